//! Matrix stack for nested transforms.
//!
//! Use explicit [`TransformStack::push`]/[`TransformStack::pop`] pairs, or
//! [`TransformStack::scoped`] for a guard that restores the previous top when
//! dropped.

use std::ops::{Deref, DerefMut};

use glam::Mat4;

/// A stack of accumulated transforms with a fixed base.
#[derive(Debug, Clone)]
pub struct TransformStack {
    stack: Vec<Mat4>,
}

impl Default for TransformStack {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

impl TransformStack {
    pub fn new(base: Mat4) -> Self {
        Self { stack: vec![base] }
    }

    /// The accumulated transform.
    pub fn top(&self) -> Mat4 {
        self.stack.last().copied().unwrap_or(Mat4::IDENTITY)
    }

    /// Pushes `transform` applied on top of the current one.
    pub fn push(&mut self, transform: Mat4) {
        let next = self.top() * transform;
        self.stack.push(next);
    }

    /// Pops the last pushed transform. The base is never popped.
    pub fn pop(&mut self) -> Option<Mat4> {
        if self.stack.len() > 1 {
            self.stack.pop()
        } else {
            None
        }
    }

    /// Number of pushes above the base.
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Pushes `transform` and returns a guard that pops it on drop.
    pub fn scoped(&mut self, transform: Mat4) -> TransformGuard<'_> {
        self.push(transform);
        TransformGuard { stack: self }
    }
}

/// Restores the previous transform when dropped.
///
/// Derefs to the stack so nested scopes can be opened from it.
pub struct TransformGuard<'a> {
    stack: &'a mut TransformStack,
}

impl Deref for TransformGuard<'_> {
    type Target = TransformStack;

    fn deref(&self) -> &TransformStack {
        self.stack
    }
}

impl DerefMut for TransformGuard<'_> {
    fn deref_mut(&mut self) -> &mut TransformStack {
        self.stack
    }
}

impl Drop for TransformGuard<'_> {
    fn drop(&mut self) {
        self.stack.pop();
    }
}
