//! Immutable shared arrays and their mutable builders.
//!
//! [`Array<T>`] is a cheap-to-clone handle over shared storage. It is the
//! result type of every pure computation in the crate. Arrays are never
//! mutated in place: build a new one with [`ArrayBuilder`] and
//! [`freeze`](ArrayBuilder::freeze) it once.
//!
//! Every array carries a [`Residency`] flag. Host and device views share the
//! same storage in this crate; moving between them is an explicit call
//! ([`Array::to_device`], [`Array::to_host`]) and never happens implicitly.
//! The communication layer keys some decisions (self-message elision) on it.

use super::telemetry::{AllocTracker, Allocation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Where an array's authoritative copy lives.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Residency {
    #[default]
    Host,
    Device,
}

/// Immutable, reference-counted array.
pub struct Array<T> {
    data: Arc<[T]>,
    residency: Residency,
    ticket: Option<Arc<Allocation>>,
}

impl<T> Clone for Array<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            residency: self.residency,
            ticket: self.ticket.clone(),
        }
    }
}

impl<T> Default for Array<T> {
    fn default() -> Self {
        Self::from_vec(Vec::new())
    }
}

impl<T: fmt::Debug> fmt::Debug for Array<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("residency", &self.residency)
            .field("data", &&*self.data)
            .finish()
    }
}

impl<T: PartialEq> PartialEq for Array<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data[..] == other.data[..]
    }
}

impl<T> Array<T> {
    pub fn from_vec(v: Vec<T>) -> Self {
        Self {
            data: v.into(),
            residency: Residency::Host,
            ticket: None,
        }
    }

    pub fn filled(n: usize, value: T) -> Self
    where
        T: Clone,
    {
        Self::from_vec(vec![value; n])
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn is_device(&self) -> bool {
        self.residency == Residency::Device
    }

    /// Mirror onto the device. Storage is shared; only the view changes.
    pub fn to_device(&self) -> Self {
        self.with_residency(Residency::Device)
    }

    /// Mirror back to the host.
    pub fn to_host(&self) -> Self {
        self.with_residency(Residency::Host)
    }

    pub fn with_residency(&self, residency: Residency) -> Self {
        let mut out = self.clone();
        out.residency = residency;
        out
    }

    /// True when both handles point at the same storage.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.data, &b.data)
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.data.to_vec()
    }

    /// Start a new builder seeded with a copy of this array.
    pub fn to_builder(&self) -> ArrayBuilder<T>
    where
        T: Clone,
    {
        ArrayBuilder::from_vec(self.to_vec()).on(self.residency)
    }

    /// Element-wise map into a new array with the same residency.
    pub fn map<U, F>(&self, f: F) -> Array<U>
    where
        F: FnMut(&T) -> U,
    {
        let mut out = Array::from_vec(self.data.iter().map(f).collect());
        out.residency = self.residency;
        out
    }
}

impl<T> Deref for Array<T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> From<Vec<T>> for Array<T> {
    fn from(v: Vec<T>) -> Self {
        Self::from_vec(v)
    }
}

impl<T> FromIterator<T> for Array<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

/// Mutable construction buffer; [`freeze`](Self::freeze) turns it into an [`Array`].
#[derive(Debug)]
pub struct ArrayBuilder<T> {
    data: Vec<T>,
    residency: Residency,
    tracker: Option<AllocTracker>,
}

impl<T> Default for ArrayBuilder<T> {
    fn default() -> Self {
        Self::from_vec(Vec::new())
    }
}

impl<T> ArrayBuilder<T> {
    pub fn new(n: usize, value: T) -> Self
    where
        T: Clone,
    {
        Self::from_vec(vec![value; n])
    }

    pub fn with_capacity(n: usize) -> Self {
        Self::from_vec(Vec::with_capacity(n))
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data,
            residency: Residency::Host,
            tracker: None,
        }
    }

    /// Charge the frozen array's bytes to `tracker`.
    pub fn tracked(mut self, tracker: &AllocTracker) -> Self {
        self.tracker = Some(tracker.clone());
        self
    }

    pub fn on(mut self, residency: Residency) -> Self {
        self.residency = residency;
        self
    }

    pub fn push(&mut self, value: T) {
        self.data.push(value);
    }

    pub fn extend_from_slice(&mut self, values: &[T])
    where
        T: Clone,
    {
        self.data.extend_from_slice(values);
    }

    pub fn freeze(self) -> Array<T> {
        let bytes = self.data.len() * std::mem::size_of::<T>();
        let ticket = self
            .tracker
            .as_ref()
            .and_then(|t| t.record(bytes))
            .map(Arc::new);
        Array {
            data: self.data.into(),
            residency: self.residency,
            ticket,
        }
    }
}

impl<T> Deref for ArrayBuilder<T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for ArrayBuilder<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Fill `out` in fixed-width chunks; chunk `i` is handed to `f(i, chunk)`.
#[cfg(feature = "rayon")]
pub fn fill_chunks<T, F>(out: &mut [T], width: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    use rayon::prelude::*;
    if width == 0 {
        return;
    }
    out.par_chunks_mut(width)
        .enumerate()
        .for_each(|(i, chunk)| f(i, chunk));
}

/// Fill `out` in fixed-width chunks; chunk `i` is handed to `f(i, chunk)`.
#[cfg(not(feature = "rayon"))]
pub fn fill_chunks<T, F>(out: &mut [T], width: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    if width == 0 {
        return;
    }
    out.chunks_mut(width)
        .enumerate()
        .for_each(|(i, chunk)| f(i, chunk));
}

/// Evaluate `f` for every entity index in `0..n`.
#[cfg(feature = "rayon")]
pub fn map_entities<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    use rayon::prelude::*;
    (0..n).into_par_iter().map(f).collect()
}

/// Evaluate `f` for every entity index in `0..n`.
#[cfg(not(feature = "rayon"))]
pub fn map_entities<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    (0..n).map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_storage() {
        let a = Array::from_vec(vec![1.0, 2.0, 3.0]);
        let b = a.clone();
        assert!(Array::ptr_eq(&a, &b));
        assert_eq!(&b[..], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn mirroring_is_explicit() {
        let a = Array::from_vec(vec![1u8, 2]);
        assert_eq!(a.residency(), Residency::Host);
        let d = a.to_device();
        assert!(d.is_device());
        assert!(!a.is_device());
        assert!(Array::ptr_eq(&a, &d));
        assert!(!d.to_host().is_device());
    }

    #[test]
    fn builder_freezes_once() {
        let mut b = ArrayBuilder::new(3, 0i32);
        b[1] = 5;
        b.push(7);
        let a = b.freeze();
        assert_eq!(&a[..], &[0, 5, 0, 7]);
    }

    #[test]
    fn tracked_arrays_release_on_drop() {
        let tracker = AllocTracker::new();
        let session = tracker.session();
        let a = ArrayBuilder::new(16, 0u64).tracked(&tracker).freeze();
        let b = a.clone();
        assert_eq!(session.stats().current_bytes, 128);
        drop(a);
        assert_eq!(session.stats().current_bytes, 128);
        drop(b);
        assert_eq!(session.stats().current_bytes, 0);
        assert_eq!(session.stats().peak_bytes, 128);
    }

    #[test]
    fn fill_chunks_visits_every_chunk() {
        let mut out = vec![0usize; 12];
        fill_chunks(&mut out, 3, |i, c| c.iter_mut().for_each(|x| *x = i));
        assert_eq!(out, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3]);
        assert_eq!(map_entities(4, |i| i * i), vec![0, 1, 4, 9]);
    }
}
