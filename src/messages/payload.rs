//! Single item or list, mirrored from request to response.

use serde::{Deserialize, Serialize};

/// A request carries one item or a list; the response keeps the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Payload<T> {
    pub fn len(&self) -> usize {
        match self {
            Payload::One(_) => 1,
            Payload::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_many(&self) -> bool {
        matches!(self, Payload::Many(_))
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Payload::One(item) => vec![item],
            Payload::Many(items) => items,
        }
    }

    /// Wrap `items` in the shape of `self`. A single request only stays
    /// single when exactly one item answers it.
    pub fn mirror<U>(&self, mut items: Vec<U>) -> Payload<U> {
        match self {
            Payload::One(_) if items.len() == 1 => match items.pop() {
                Some(item) => Payload::One(item),
                None => Payload::Many(items),
            },
            _ => Payload::Many(items),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Payload<U> {
        match self {
            Payload::One(item) => Payload::One(f(item)),
            Payload::Many(items) => Payload::Many(items.into_iter().map(f).collect()),
        }
    }

    /// The single item of a `One` payload, or the first item of a list.
    pub fn into_first(self) -> Option<T> {
        self.into_vec().into_iter().next()
    }
}
