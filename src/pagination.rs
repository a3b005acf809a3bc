//! Page slicing for list endpoints.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub page: usize,
  pub page_size: usize,
  pub total_items: usize,
  pub total_pages: usize,
}

/// 1-based pages. Page 0 reads as page 1 and pages past the end clamp to the
/// last page. `page_size` is clamped to `1..=max_page_size`.
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize, max_page_size: usize) -> Page<T> {
  let page_size = page_size.clamp(1, max_page_size.max(1));
  let total_items = items.len();
  let total_pages = total_items.div_ceil(page_size);
  let page = page.max(1).min(total_pages.max(1));
  let start = (page - 1) * page_size;
  let end = (start + page_size).min(total_items);
  let items = if start < end { items[start..end].to_vec() } else { Vec::new() };
  Page { items, page, page_size, total_items, total_pages }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn twenty_three_items_make_three_pages() {
    let items: Vec<u32> = (1..=23).collect();
    let p = paginate(&items, 3, 10, 100);
    assert_eq!(p.total_pages, 3);
    assert_eq!(p.items, vec![21, 22, 23]);
    assert_eq!(p.page, 3);
  }

  #[test]
  fn out_of_range_pages_clamp() {
    let items: Vec<u32> = (1..=23).collect();
    assert_eq!(paginate(&items, 0, 10, 100).items[0], 1);
    assert_eq!(paginate(&items, 9, 10, 100).page, 3);
  }

  #[test]
  fn empty_list_has_no_pages() {
    let p = paginate::<u32>(&[], 4, 10, 100);
    assert_eq!(p.total_pages, 0);
    assert_eq!(p.page, 1);
    assert!(p.items.is_empty());
  }

  #[test]
  fn page_size_is_clamped() {
    let items: Vec<u32> = (1..=5).collect();
    assert_eq!(paginate(&items, 1, 0, 100).page_size, 1);
    assert_eq!(paginate(&items, 1, 500, 3).items.len(), 3);
  }
}
