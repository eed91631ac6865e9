//! Page/size slicing of ranked results

use catrank_common::RankedEntry;
use serde::Serialize;

/// One page of a ranked result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPage {
    /// Index of the last page, `ceil(count / size) - 1`; -1 for an empty result
    pub total: i64,
    pub data: Vec<RankedEntry>,
}

/// Slice `[page * size, (page + 1) * size)` out of `entries`, clamped.
///
/// `size` must be at least 1; the handler rejects anything else.
pub fn paginate(entries: &[RankedEntry], page: usize, size: usize) -> ResultPage {
    let size = size.max(1);
    let total = entries.len().div_ceil(size) as i64 - 1;

    let start = page.saturating_mul(size).min(entries.len());
    let end = start.saturating_add(size).min(entries.len());

    ResultPage {
        total,
        data: entries[start..end].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<RankedEntry> {
        (0..n)
            .map(|i| RankedEntry {
                title: format!("Page {}", i),
                rank: (n - i) as f64,
                image: None,
            })
            .collect()
    }

    #[test]
    fn test_first_page() {
        let result = paginate(&entries(30), 0, 12);
        assert_eq!(result.total, 2);
        assert_eq!(result.data.len(), 12);
        assert_eq!(result.data[0].title, "Page 0");
    }

    #[test]
    fn test_last_partial_page() {
        let result = paginate(&entries(30), 2, 12);
        assert_eq!(result.total, 2);
        assert_eq!(result.data.len(), 6);
        assert_eq!(result.data[0].title, "Page 24");
        assert_eq!(result.data[5].title, "Page 29");
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let result = paginate(&entries(30), 7, 12);
        assert_eq!(result.total, 2);
        assert!(result.data.is_empty());

        let result = paginate(&entries(3), usize::MAX, usize::MAX);
        assert!(result.data.is_empty());
    }

    #[test]
    fn test_exact_multiple() {
        assert_eq!(paginate(&entries(24), 0, 12).total, 1);
        assert_eq!(paginate(&entries(1), 0, 12).total, 0);
    }

    #[test]
    fn test_empty_result() {
        let result = paginate(&[], 0, 12);
        assert_eq!(result.total, -1);
        assert!(result.data.is_empty());
    }
}
