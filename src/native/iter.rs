//! Depth-first traversal of nested native values.

use super::value::{NativeDict, NativeValue};

/// One step of a path from a root dictionary to a nested value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathComponent {
    Key(String),
    Index(usize),
}

/// A value reached during deep iteration, with its full path.
#[derive(Clone, Debug)]
pub struct DeepEntry {
    pub path: Vec<PathComponent>,
    pub value: NativeValue,
}

struct Frame {
    entries: Vec<(PathComponent, NativeValue)>,
    next: usize,
}

impl Frame {
    fn children_of(value: &NativeValue) -> Option<Self> {
        let entries = match value {
            NativeValue::Dict(dict) => dict
                .iter()
                .map(|(k, v)| (PathComponent::Key(k.clone()), v.clone()))
                .collect(),
            NativeValue::Array(array) => array
                .iter()
                .enumerate()
                .map(|(i, v)| (PathComponent::Index(i), v.clone()))
                .collect(),
            _ => return None,
        };
        Some(Frame { entries, next: 0 })
    }
}

/// Visits every value reachable from a dictionary, parents before children.
///
/// Containers are yielded themselves and then descended into, unless
/// [`DeepIter::skip_children`] is called right after they are yielded.
pub struct DeepIter {
    frames: Vec<Frame>,
    prefix: Vec<PathComponent>,
    pending: Option<(PathComponent, NativeValue)>,
}

impl DeepIter {
    pub fn new(root: &NativeDict) -> Self {
        let root = NativeValue::Dict(root.clone());
        Self {
            frames: Frame::children_of(&root).into_iter().collect(),
            prefix: Vec::new(),
            pending: None,
        }
    }

    /// Do not descend into the value most recently yielded.
    pub fn skip_children(&mut self) {
        self.pending = None;
    }
}

impl Iterator for DeepIter {
    type Item = DeepEntry;

    fn next(&mut self) -> Option<DeepEntry> {
        if let Some((component, value)) = self.pending.take() {
            if let Some(frame) = Frame::children_of(&value) {
                self.prefix.push(component);
                self.frames.push(frame);
            }
        }

        loop {
            let frame = self.frames.last_mut()?;
            if let Some((component, value)) = frame.entries.get(frame.next).cloned() {
                frame.next += 1;
                let mut path = self.prefix.clone();
                path.push(component.clone());
                self.pending = Some((component, value.clone()));
                return Some(DeepEntry { path, value });
            }

            self.frames.pop();
            if self.frames.is_empty() {
                return None;
            }
            // Every frame above the root was entered through a prefix component.
            self.prefix.pop();
        }
    }
}
