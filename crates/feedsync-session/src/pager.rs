//! Synthetic page arithmetic.
//!
//! Pages are cut over a parent's child list in insertion order. Only
//! features count towards a page; real tokens ride along with the feature
//! before them.

use feedsync_core::config::PagingConfig;
use feedsync_core::ContentId;

use crate::tree::ContentTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingPolicy {
    pub initial_page_size: usize,
    pub page_size: usize,
    pub min_page_size: usize,
}

impl PagingPolicy {
    pub fn from_config(config: &PagingConfig) -> Self {
        Self {
            initial_page_size: config.initial_page_size,
            page_size: config.page_size,
            min_page_size: config.min_page_size,
        }
    }

    pub fn disabled() -> Self {
        Self {
            initial_page_size: 0,
            page_size: 0,
            min_page_size: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.initial_page_size > 0
    }

    /// How many of `remaining` features the next page reveals.
    ///
    /// `None` means reveal all of them: paging is off, or the remainder
    /// would leave a page smaller than `min_page_size`.
    pub fn cut(&self, first: bool, remaining: usize) -> Option<usize> {
        if !self.enabled() {
            return None;
        }
        let page = if first { self.initial_page_size } else { self.page_size };
        if page == 0 || remaining <= page || remaining < page + self.min_page_size {
            None
        } else {
            Some(page)
        }
    }
}

impl Default for PagingPolicy {
    fn default() -> Self {
        Self::from_config(&PagingConfig::default())
    }
}

/// A child list split into what to reveal now and what stays behind a
/// synthetic token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub revealed: Vec<ContentId>,
    pub pending: Vec<ContentId>,
}

impl Split {
    pub fn needs_token(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Cuts pages over child lists using a [`PagingPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenPager {
    policy: PagingPolicy,
}

impl TokenPager {
    pub fn new(policy: PagingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PagingPolicy {
        &self.policy
    }

    /// First reveal of a paging node.
    pub fn first_page(&self, entries: &[ContentId], tree: &ContentTree) -> Split {
        self.split(true, entries, tree)
    }

    /// Page behind a synthetic token, or sub-paging of a real-token page.
    pub fn next_page(&self, entries: &[ContentId], tree: &ContentTree) -> Split {
        self.split(false, entries, tree)
    }

    fn split(&self, first: bool, entries: &[ContentId], tree: &ContentTree) -> Split {
        let features = entries.iter().filter(|id| !tree.is_token(id)).count();
        let Some(page) = self.policy.cut(first, features) else {
            return Split {
                revealed: entries.to_vec(),
                pending: Vec::new(),
            };
        };

        let mut seen = 0;
        let mut at = entries.len();
        for (index, id) in entries.iter().enumerate() {
            if tree.is_token(id) {
                continue;
            }
            seen += 1;
            if seen == page {
                at = index + 1;
                break;
            }
        }

        Split {
            revealed: entries[..at].to_vec(),
            pending: entries[at..].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_core::ContentNode;

    fn id(n: u64) -> ContentId {
        ContentId::feature("stream", n)
    }

    fn tree_with(count: u64) -> (ContentTree, Vec<ContentId>) {
        let mut tree = ContentTree::new();
        tree.set_root(ContentNode::feature(id(0), vec![])).unwrap();
        for n in 1..=count {
            tree.insert_child(&id(0), ContentNode::feature(id(n), vec![])).unwrap();
        }
        let entries = tree.children(&id(0)).to_vec();
        (tree, entries)
    }

    fn pager(initial: usize, page: usize, min: usize) -> TokenPager {
        TokenPager::new(PagingPolicy {
            initial_page_size: initial,
            page_size: page,
            min_page_size: min,
        })
    }

    #[test]
    fn test_slop_sequence_4_4_5() {
        let (tree, entries) = tree_with(13);
        let pager = pager(4, 4, 2);

        let mut sizes = Vec::new();
        let mut split = pager.first_page(&entries, &tree);
        sizes.push(split.revealed.len());
        while split.needs_token() {
            split = pager.next_page(&split.pending, &tree);
            sizes.push(split.revealed.len());
        }
        assert_eq!(sizes, vec![4, 4, 5]);
    }

    #[test]
    fn test_cut_boundaries() {
        let policy = PagingPolicy {
            initial_page_size: 4,
            page_size: 4,
            min_page_size: 2,
        };
        assert_eq!(policy.cut(false, 5), None);
        assert_eq!(policy.cut(false, 6), Some(4));
        assert_eq!(PagingPolicy::disabled().cut(true, 100), None);
    }

    #[test]
    fn test_tokens_do_not_count() {
        let (mut tree, _) = tree_with(6);
        let token = ContentId::token("stream", 99);
        tree.insert_child(&id(0), ContentNode::token(token.clone(), vec![])).unwrap();
        let entries = tree.children(&id(0)).to_vec();

        let split = pager(3, 3, 0).first_page(&entries, &tree);
        assert_eq!(split.revealed, vec![id(1), id(2), id(3)]);
        assert_eq!(split.pending, vec![id(4), id(5), id(6), token]);

        let rest = pager(3, 3, 0).next_page(&split.pending, &tree);
        assert!(!rest.needs_token());
        assert_eq!(rest.revealed.len(), 4);
    }
}
