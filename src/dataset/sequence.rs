use std::ops::Range;

use ndarray::{Array1, Array4, ArrayView3, Axis};

/// An in-memory split: `n` raw images and their `n` labels, co-indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct Examples {
    images: Array4<u8>,
    labels: Array1<i64>,
}

impl Examples {
    /// Creates a new `Examples`.
    ///
    /// # Arguments
    /// * `images` - The images as `[n, height, width, channels]`.
    /// * `labels` - One label per image.
    ///
    /// # Returns
    /// A new `Examples` instance.
    ///
    /// # Panics
    /// If `images` and `labels` don't hold the same amount of examples.
    pub fn new(images: Array4<u8>, labels: Array1<i64>) -> Self {
        assert_eq!(
            images.len_of(Axis(0)),
            labels.len(),
            "images and labels must hold the same amount of examples"
        );

        Self { images, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the `i`th image and its label, if `i` is in bounds.
    pub fn get(&self, i: usize) -> Option<(ArrayView3<'_, u8>, i64)> {
        let label = *self.labels.get(i)?;
        Some((self.images.index_axis(Axis(0), i), label))
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            examples: self,
            range: 0..self.len(),
        }
    }

    pub fn images(&self) -> &Array4<u8> {
        &self.images
    }

    pub fn labels(&self) -> &Array1<i64> {
        &self.labels
    }
}

/// Iterates over the `(image, label)` pairs of `Examples` in order.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    examples: &'a Examples,
    range: Range<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (ArrayView3<'a, u8>, i64);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.range.next()?;
        self.examples.get(i)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let i = self.range.next_back()?;
        self.examples.get(i)
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a Examples {
    type Item = (ArrayView3<'a, u8>, i64);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn examples(n: usize) -> Examples {
        let images = Array4::from_shape_fn((n, 2, 2, 3), |(i, ..)| i as u8);
        let labels = Array1::from_iter(0..n as i64).mapv(|l| l * 10);
        Examples::new(images, labels)
    }

    #[test]
    fn get_is_co_indexed() {
        let examples = examples(3);

        assert_eq!(examples.len(), 3);
        let (image, label) = examples.get(2).unwrap();
        assert_eq!(label, 20);
        assert!(image.iter().all(|&p| p == 2));
        assert!(examples.get(3).is_none());
    }

    #[test]
    fn iter_both_ends() {
        let examples = examples(4);
        let mut iter = examples.iter();

        assert_eq!(iter.len(), 4);
        assert_eq!(iter.next().map(|(_, l)| l), Some(0));
        assert_eq!(iter.next_back().map(|(_, l)| l), Some(30));
        assert_eq!(iter.len(), 2);

        let labels: Vec<_> = (&examples).into_iter().map(|(_, l)| l).collect();
        assert_eq!(labels, vec![0, 10, 20, 30]);
    }

    #[test]
    fn empty() {
        let examples = Examples::new(Array4::zeros((0, 32, 32, 3)), Array1::zeros(0));
        assert!(examples.is_empty());
        assert_eq!(examples.iter().count(), 0);
    }

    #[test]
    #[should_panic]
    fn mismatched_lengths_panic() {
        Examples::new(Array4::zeros((2, 1, 1, 3)), Array1::zeros(3));
    }
}
