//! Demo content loaded at startup so the runner is usable without authoring
//! anything first: one practice test with a reading passage, a listening part
//! and both writing tasks.

use tracing::{info, instrument};

use crate::domain::{Difficulty, Modality, QuestionOption, SubQuestion, Test, TestMode, TestStatus};
use crate::store::{ContentStore, PartDraft, QuestionGroupDraft, SectionDraft, StoreError, TestDraft};

const PASSAGE: &str = r#"<h2>The Decline of the Honeybee</h2>
<p><strong>A</strong> Over the past two decades, beekeepers across Europe and North America have reported unusually heavy losses of their colonies. In some regions, more than a third of hives failed to survive the winter. Scientists were initially puzzled, because the bees did not die inside the hive; they simply disappeared.</p>
<p><strong>B</strong> Researchers now believe that no single cause is responsible. Parasitic mites weaken colonies and spread viruses, while certain pesticides appear to interfere with the insects' ability to navigate. Poor nutrition, caused by farmland planted with a single crop, leaves colonies less able to resist disease.</p>
<p><strong>C</strong> The consequences reach far beyond honey production. Roughly three quarters of the world's leading food crops depend to some extent on animal pollination, and honeybees are the most commercially important pollinators. Almond growers in California, for example, rent more than a million hives each spring.</p>
<p><strong>D</strong> Some governments have responded by restricting the use of neonicotinoid pesticides. Farmers, meanwhile, are being encouraged to plant strips of wildflowers along field margins. Early studies suggest that these measures help wild bees as much as managed colonies.</p>"#;

fn sub(number: u32, text: &str, answer: &str) -> SubQuestion {
  SubQuestion { number, text: text.into(), correct_answer: answer.into(), explanation: String::new() }
}

fn opt(key: &str, text: &str, order: u32) -> QuestionOption {
  QuestionOption { key: key.into(), text: text.into(), is_correct: false, order }
}

fn group(part_id: &str, question_type: &str, position: u32) -> QuestionGroupDraft {
  QuestionGroupDraft {
    part_id: part_id.into(),
    question_type: question_type.into(),
    number: None,
    title: String::new(),
    instructions: String::new(),
    content_html: String::new(),
    image_url: None,
    max_choices: None,
    position,
    sub_questions: Vec::new(),
    options: Vec::new(),
  }
}

fn part(section_id: &str, number: u32, title: &str) -> PartDraft {
  PartDraft {
    section_id: section_id.into(),
    number,
    title: title.into(),
    instructions: String::new(),
    difficulty: Difficulty::Medium,
    time_limit_minutes: 0,
    content_html: String::new(),
    audio_url: None,
    image_url: None,
    min_words: None,
  }
}

/// Insert the demo test into `store`.
#[instrument(level = "info", skip_all)]
pub async fn seed_demo_content(store: &ContentStore) -> Result<Test, StoreError> {
  let test = store
    .create_test(TestDraft {
      title: "Academic Practice Test 1".into(),
      description: "A short sample test covering Reading, Listening and Writing.".into(),
      mode: TestMode::Practice,
      status: TestStatus::Published,
      category: "academic".into(),
    })
    .await?;

  seed_reading(store, &test.id).await?;
  seed_listening(store, &test.id).await?;
  seed_writing(store, &test.id).await?;

  info!(target: "content", test_id = %test.id, "Demo content seeded");
  Ok(test)
}

async fn seed_reading(store: &ContentStore, test_id: &str) -> Result<(), StoreError> {
  let section = store
    .create_section(SectionDraft {
      test_id: Some(test_id.into()),
      modality: Modality::Reading,
      title: "Reading".into(),
      description: String::new(),
      position: 0,
    })
    .await?;

  let mut p = part(&section.id, 1, "Reading Passage 1");
  p.instructions = "You should spend about 20 minutes on Questions 1–9.".into();
  p.time_limit_minutes = 20;
  p.content_html = PASSAGE.into();
  let p = store.create_part(p).await?;

  let mut tfng = group(&p.id, "true_false_not_given", 0);
  tfng.instructions = "Do the following statements agree with the information given in the passage?".into();
  tfng.sub_questions = vec![
    sub(1, "Most of the missing bees were found dead inside their hives.", "FALSE"),
    sub(2, "Mites can transmit viruses to bee colonies.", "TRUE"),
    sub(3, "Wildflower strips were first introduced in California.", "NOT GIVEN"),
  ];
  store.create_group(tfng).await?;

  let mut headings = group(&p.id, "matching_headings", 1);
  headings.instructions = "Choose the correct heading for paragraphs B–D from the list of headings below.".into();
  headings.options = vec![
    opt("i", "A combination of threats", 0),
    opt("ii", "Measures that may help", 1),
    opt("iii", "The rising price of honey", 2),
    opt("iv", "Why pollination matters", 3),
    opt("v", "A new species of mite", 4),
  ];
  headings.sub_questions = vec![sub(4, "Paragraph B", "i"), sub(5, "Paragraph C", "iv"), sub(6, "Paragraph D", "ii")];
  store.create_group(headings).await?;

  let mut mc = group(&p.id, "multiple_choice", 2);
  mc.number = Some(7);
  mc.title = "According to the passage, almond growers in California".into();
  mc.options = vec![
    opt("A", "keep their own bees all year.", 0),
    QuestionOption { key: "B".into(), text: "rent very large numbers of hives.".into(), is_correct: true, order: 1 },
    opt("C", "have stopped using pesticides.", 2),
    opt("D", "rely mainly on wild bees.", 3),
  ];
  store.create_group(mc).await?;

  let mut sentences = group(&p.id, "sentence_completion", 3);
  sentences.instructions = "Complete the sentences. Choose ONE WORD ONLY from the passage for each answer.".into();
  sentences.sub_questions = vec![
    sub(8, "Farmland planted with a single crop can lead to poor ____ for bees.", "nutrition"),
    sub(9, "Some governments have restricted the use of neonicotinoid ____.", "pesticides"),
  ];
  store.create_group(sentences).await?;
  Ok(())
}

async fn seed_listening(store: &ContentStore, test_id: &str) -> Result<(), StoreError> {
  let section = store
    .create_section(SectionDraft {
      test_id: Some(test_id.into()),
      modality: Modality::Listening,
      title: "Listening".into(),
      description: String::new(),
      position: 1,
    })
    .await?;

  let mut p = part(&section.id, 1, "Part 1");
  p.instructions = "You will hear a phone call about joining a sports centre.".into();
  p.audio_url = Some("/files/audio/demo-listening-part1.mp3".into());
  let p = store.create_part(p).await?;

  let mut notes = group(&p.id, "note_completion", 0);
  notes.instructions = "Write NO MORE THAN TWO WORDS AND/OR A NUMBER for each answer.".into();
  notes.content_html = "<h3>Riverside Sports Centre</h3><ul><li>Membership type: (1)</li><li>Monthly fee: £(2)</li><li>Induction day: (3)</li><li>Bring: (4)</li></ul>".into();
  notes.sub_questions = vec![
    sub(1, "Membership type", "off-peak"),
    sub(2, "Monthly fee", "32"),
    sub(3, "Induction day", "Thursday"),
    sub(4, "Bring", "photo"),
  ];
  store.create_group(notes).await?;

  let mut choose_two = group(&p.id, "multiple_choice_multiple", 1);
  choose_two.title = "Which TWO facilities are included in the membership?".into();
  choose_two.max_choices = Some(2);
  choose_two.options = vec![
    QuestionOption { key: "A".into(), text: "swimming pool".into(), is_correct: true, order: 0 },
    opt("B", "tennis courts", 1),
    QuestionOption { key: "C".into(), text: "sauna".into(), is_correct: true, order: 2 },
    opt("D", "climbing wall", 3),
  ];
  choose_two.sub_questions = vec![sub(5, "", ""), sub(6, "", "")];
  store.create_group(choose_two).await?;

  let mut p2 = part(&section.id, 2, "Part 2");
  p2.instructions = "You will hear a guide talking to visitors at a community garden.".into();
  p2.audio_url = Some("/files/audio/demo-listening-part2.mp3".into());
  let p2 = store.create_part(p2).await?;

  let mut guide = group(&p2.id, "short_answer", 0);
  guide.instructions = "Answer the questions. Write ONE WORD ONLY for each answer.".into();
  guide.sub_questions = vec![
    sub(7, "What do the volunteers plant along the fence?", "lavender"),
    sub(8, "On which day is the garden closed?", "Monday"),
  ];
  store.create_group(guide).await?;
  Ok(())
}

async fn seed_writing(store: &ContentStore, test_id: &str) -> Result<(), StoreError> {
  let section = store
    .create_section(SectionDraft {
      test_id: Some(test_id.into()),
      modality: Modality::Writing,
      title: "Writing".into(),
      description: String::new(),
      position: 2,
    })
    .await?;

  let mut t1 = part(&section.id, 1, "Writing Task 1");
  t1.instructions = "The chart below shows the number of managed honeybee colonies in three countries between 2000 and 2020. Summarise the information by selecting and reporting the main features, and make comparisons where relevant.".into();
  t1.time_limit_minutes = 20;
  t1.min_words = Some(150);
  t1.image_url = Some("/files/image/demo-task1-chart.png".into());
  store.create_part(t1).await?;

  let mut t2 = part(&section.id, 2, "Writing Task 2");
  t2.instructions = "Some people believe that governments should ban pesticides that harm pollinating insects, even if this raises the cost of food. To what extent do you agree or disagree?".into();
  t2.time_limit_minutes = 40;
  t2.min_words = Some(250);
  t2.difficulty = Difficulty::Hard;
  store.create_part(t2).await?;
  Ok(())
}
