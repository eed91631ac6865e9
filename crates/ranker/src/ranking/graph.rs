//! Category link graph
//!
//! Pages are indexed by first-seen membership order. Titles only exist at the
//! boundary; the finished graph works on integer indices.

use catrank_common::source::{CategoryMember, PageLinks};
use std::collections::{BTreeSet, HashMap};

/// A category member with its graph index
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub title: String,
    pub index: usize,
    pub image: Option<String>,
}

/// Intra-category links as sorted, deduplicated out-neighbour lists
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    rows: Vec<Vec<usize>>,
}

impl LinkGraph {
    /// Build directly from adjacency lists; out-of-range targets are dropped
    #[cfg(test)]
    pub fn from_adjacency(rows: Vec<Vec<usize>>) -> Self {
        let n = rows.len();
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .filter(|&j| j < n)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .collect();
        Self { rows }
    }

    /// Number of pages
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Pages linked from page `i`
    pub fn out_links(&self, i: usize) -> &[usize] {
        &self.rows[i]
    }

    /// Dense cell access: 1 if `i` links to `j`
    #[cfg(test)]
    pub fn has_link(&self, i: usize, j: usize) -> bool {
        self.rows[i].binary_search(&j).is_ok()
    }

    pub fn edge_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }
}

/// Finished graph for one category
#[derive(Debug, Clone)]
pub struct CategoryGraph {
    pub pages: Vec<Page>,
    pub links: LinkGraph,
    index: HashMap<String, usize>,
}

impl CategoryGraph {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn index_of(&self, title: &str) -> Option<usize> {
        self.index.get(title).copied()
    }
}

/// Accumulates indexed edges until `build`
pub struct GraphBuilder {
    pages: Vec<Page>,
    index: HashMap<String, usize>,
    edges: Vec<BTreeSet<usize>>,
}

impl GraphBuilder {
    /// Index the membership list; duplicates keep their first index
    pub fn new<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pages = Vec::new();
        let mut index = HashMap::new();

        for title in titles {
            let title = title.into();
            if index.contains_key(&title) {
                continue;
            }
            let i = pages.len();
            index.insert(title.clone(), i);
            pages.push(Page {
                title,
                index: i,
                image: None,
            });
        }

        let edges = vec![BTreeSet::new(); pages.len()];
        Self { pages, index, edges }
    }

    pub fn from_members(members: &[CategoryMember]) -> Self {
        Self::new(members.iter().map(|m| m.title.clone()))
    }

    /// Merge one link record; returns the number of new edges.
    ///
    /// Records for titles outside the membership list are ignored, as are
    /// links to such titles.
    pub fn add_page_links(&mut self, record: &PageLinks) -> usize {
        let Some(&from) = self.index.get(&record.title) else {
            return 0;
        };

        if self.pages[from].image.is_none() {
            self.pages[from].image = record.thumbnail.clone();
        }

        let mut added = 0;
        for target in &record.links {
            if let Some(&to) = self.index.get(target) {
                if self.edges[from].insert(to) {
                    added += 1;
                }
            }
        }
        added
    }

    pub fn build(self) -> CategoryGraph {
        let rows = self
            .edges
            .into_iter()
            .map(|targets| targets.into_iter().collect())
            .collect();

        CategoryGraph {
            pages: self.pages,
            links: LinkGraph { rows },
            index: self.index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, links: &[&str], thumbnail: Option<&str>) -> PageLinks {
        PageLinks {
            title: title.to_string(),
            links: links.iter().map(|l| l.to_string()).collect(),
            thumbnail: thumbnail.map(str::to_string),
        }
    }

    #[test]
    fn test_index_is_first_seen_bijection() {
        let graph = GraphBuilder::new(["B", "A", "B", "C"]).build();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.index_of("B"), Some(0));
        assert_eq!(graph.index_of("A"), Some(1));
        assert_eq!(graph.index_of("C"), Some(2));
        for (i, page) in graph.pages.iter().enumerate() {
            assert_eq!(page.index, i);
            assert_eq!(graph.index_of(&page.title), Some(i));
        }
    }

    #[test]
    fn test_external_links_ignored() {
        let mut builder = GraphBuilder::new(["A", "B"]);
        assert_eq!(builder.add_page_links(&record("A", &["B", "Elsewhere"], None)), 1);
        assert_eq!(builder.add_page_links(&record("Stranger", &["A"], None)), 0);

        let graph = builder.build();
        assert!(graph.links.has_link(0, 1));
        assert_eq!(graph.links.edge_count(), 1);
    }

    #[test]
    fn test_split_link_batches_merge() {
        let mut builder = GraphBuilder::new(["A", "B", "C"]);
        builder.add_page_links(&record("A", &["B"], None));
        builder.add_page_links(&record("A", &["C", "B"], None));

        let graph = builder.build();
        assert_eq!(graph.links.out_links(0), &[1, 2]);
    }

    #[test]
    fn test_first_thumbnail_wins() {
        let mut builder = GraphBuilder::new(["A"]);
        builder.add_page_links(&record("A", &[], None));
        builder.add_page_links(&record("A", &[], Some("first.png")));
        builder.add_page_links(&record("A", &[], Some("second.png")));

        let graph = builder.build();
        assert_eq!(graph.pages[0].image.as_deref(), Some("first.png"));
    }

    #[test]
    fn test_self_link_kept() {
        let mut builder = GraphBuilder::new(["A", "B"]);
        builder.add_page_links(&record("A", &["A"], None));

        let graph = builder.build();
        assert!(graph.links.has_link(0, 0));
        assert!(!graph.links.has_link(1, 1));
    }

    #[test]
    fn test_empty_category() {
        let graph = GraphBuilder::new(Vec::<String>::new()).build();
        assert!(graph.is_empty());
        assert!(graph.links.is_empty());
    }

    #[test]
    fn test_from_adjacency_normalizes_rows() {
        let links = LinkGraph::from_adjacency(vec![vec![1, 1, 5], vec![]]);
        assert_eq!(links.out_links(0), &[1]);
        assert_eq!(links.edge_count(), 1);
    }
}
