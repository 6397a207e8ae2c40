//! Typed mutations of cached lists.

use std::fmt;

use resync_core::CacheKey;

use crate::mutation::Mutation;

/// Element of a cached list that mutations can address by id.
pub trait ListItem: Clone + Send + Sync + 'static {
    /// Identifier used to find the item in the list.
    type Id: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Identifier of this item.
    fn id(&self) -> Self::Id;

    /// Flip the item's visibility. Items without one ignore the call.
    fn set_published(&mut self, _published: bool) {}
}

/// Change to a cached list, carrying its own optimistic transform.
#[derive(Debug, Clone, PartialEq)]
pub enum ListMutation<I: ListItem> {
    /// Add an item at the front, or replace the item with the same id.
    Insert(I),
    /// Replace the item with the same id; unknown ids leave the list as is.
    Replace(I),
    /// Remove the item with this id.
    Delete(I::Id),
    /// Make the item visible.
    Publish(I::Id),
    /// Hide the item.
    Unpublish(I::Id),
}

impl<I: ListItem> ListMutation<I> {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Replace(_) => "replace",
            Self::Delete(_) => "delete",
            Self::Publish(_) => "publish",
            Self::Unpublish(_) => "unpublish",
        }
    }

    /// Id of the item the mutation targets.
    #[must_use]
    pub fn target(&self) -> I::Id {
        match self {
            Self::Insert(item) | Self::Replace(item) => item.id(),
            Self::Delete(id) | Self::Publish(id) | Self::Unpublish(id) => id.clone(),
        }
    }

    /// List as it looks once the mutation has been applied.
    #[must_use]
    pub fn apply(&self, items: &[I]) -> Vec<I> {
        match self {
            Self::Insert(new) => {
                let id = new.id();
                if items.iter().any(|item| item.id() == id) {
                    return replace(items, new);
                }
                let mut next = Vec::with_capacity(items.len() + 1);
                next.push(new.clone());
                next.extend_from_slice(items);
                next
            }
            Self::Replace(new) => replace(items, new),
            Self::Delete(id) => items.iter().filter(|item| item.id() != *id).cloned().collect(),
            Self::Publish(id) => set_published(items, id, true),
            Self::Unpublish(id) => set_published(items, id, false),
        }
    }

    /// Wrap into a [`Mutation`] of `key` with [`ListMutation::apply`] as the
    /// optimistic update.
    #[must_use]
    pub fn into_mutation(self, key: CacheKey) -> Mutation<Vec<I>> {
        Mutation::new(key).optimistic(move |items: &Vec<I>| self.apply(items))
    }
}

fn replace<I: ListItem>(items: &[I], new: &I) -> Vec<I> {
    let id = new.id();
    items
        .iter()
        .map(|item| if item.id() == id { new.clone() } else { item.clone() })
        .collect()
}

fn set_published<I: ListItem>(items: &[I], id: &I::Id, published: bool) -> Vec<I> {
    items
        .iter()
        .map(|item| {
            let mut item = item.clone();
            if item.id() == *id {
                item.set_published(published);
            }
            item
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Tutor {
        id: u32,
        name: &'static str,
        published: bool,
    }

    impl ListItem for Tutor {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }

        fn set_published(&mut self, published: bool) {
            self.published = published;
        }
    }

    fn tutor(id: u32, name: &'static str) -> Tutor {
        Tutor {
            id,
            name,
            published: false,
        }
    }

    fn tutors() -> Vec<Tutor> {
        vec![tutor(1, "Ada"), tutor(2, "Grace"), tutor(3, "Edsger")]
    }

    fn ids(items: &[Tutor]) -> Vec<u32> {
        items.iter().map(|item| item.id).collect()
    }

    #[test]
    fn insert_prepends_new_items() {
        let next = ListMutation::Insert(tutor(4, "Barbara")).apply(&tutors());
        assert_eq!(ids(&next), vec![4, 1, 2, 3]);
    }

    #[test]
    fn insert_with_known_id_replaces_in_place() {
        let next = ListMutation::Insert(tutor(2, "Grace H.")).apply(&tutors());
        assert_eq!(ids(&next), vec![1, 2, 3]);
        assert_eq!(next[1].name, "Grace H.");
    }

    #[test]
    fn replace_ignores_unknown_ids() {
        assert_eq!(ListMutation::Replace(tutor(9, "Nobody")).apply(&tutors()), tutors());
    }

    #[test]
    fn delete_removes_only_target() {
        let next = ListMutation::<Tutor>::Delete(2).apply(&tutors());
        assert_eq!(ids(&next), vec![1, 3]);
        assert_eq!(ListMutation::<Tutor>::Delete(42).apply(&tutors()), tutors());
    }

    #[test]
    fn publish_and_unpublish_toggle_visibility() {
        let published = ListMutation::<Tutor>::Publish(3).apply(&tutors());
        assert!(published[2].published);
        assert!(!published[0].published);

        let hidden = ListMutation::<Tutor>::Unpublish(3).apply(&published);
        assert_eq!(hidden, tutors());
    }

    #[test]
    fn kind_and_target_describe_the_change() {
        let mutation = ListMutation::Replace(tutor(1, "Ada L."));
        assert_eq!(mutation.kind(), "replace");
        assert_eq!(mutation.target(), 1);
        assert_eq!(ListMutation::<Tutor>::Unpublish(5).kind(), "unpublish");
    }

    #[test]
    fn into_mutation_targets_key() {
        let key = CacheKey::resource("ai-tutors").with("user-1");
        let mutation = ListMutation::<Tutor>::Delete(1).into_mutation(key.clone());
        assert_eq!(mutation.key(), &key);
        assert!(mutation.is_optimistic());
    }
}
