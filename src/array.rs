//! Provides the [`ArrND`] type, the dense storage behind every [`Field`](crate::field::Field),
//! together with [`Shape`] and the row-major index iterator [`NDIndexer`].

use std::ops::{Index, IndexMut};

/// Type alias for index tuples
pub type Ix<const ND: usize> = [usize; ND];

pub fn shape<const ND: usize>(shape: [usize; ND]) -> Shape<ND> {
    Shape(shape)
}

/// Array shape
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape<const ND: usize>(Ix<ND>);

impl<const ND: usize> Shape<ND> {
    /// Return the number of the elements of the array
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }
}

impl<const ND: usize> IntoIterator for Shape<ND> {
    type Item = Ix<ND>;

    type IntoIter = NDIndexer<ND>;

    fn into_iter(self) -> Self::IntoIter {
        NDIndexer {
            inner: None,
            shape: self.0,
        }
    }
}

impl<const ND: usize> Index<usize> for Shape<ND> {
    type Output = usize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

/// Iterates over all indices of a [`Shape`], last dimension fastest.
pub struct NDIndexer<const ND: usize> {
    inner: Option<Ix<ND>>,
    shape: Ix<ND>,
}

impl<const ND: usize> Iterator for NDIndexer<ND> {
    type Item = Ix<ND>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.shape.iter().any(|&n| n == 0) {
            return None;
        }
        match self.inner {
            Some(ix) => {
                let shape = self.shape;
                let mut ix = ix;
                ix[ND - 1] += 1;
                (1..ND).rev().for_each(|d| {
                    if ix[d] >= shape[d] {
                        ix[d] = 0;
                        ix[d - 1] += 1
                    }
                });
                if ix[0] >= shape[0] {
                    // stay exhausted
                    self.inner = Some(ix);
                    None
                } else {
                    self.inner = Some(ix);
                    self.inner
                }
            }
            None => {
                self.inner = Some([0; ND]);
                self.inner
            }
        }
    }
}

/// Shift `idx` by `shift` on a periodic axis of length `len`.
pub fn cyclic_shift(idx: usize, shift: isize, len: usize) -> usize {
    (idx as isize + shift).rem_euclid(len as isize) as usize
}

/// N-dimensional Array with linear contiguous memory layout.
///
/// The data is stored in a boxed slice and available via indexing with an
/// array of indices. The indexing is row-major, i.e. the last index runs fastest.
///
/// # Examples
/// Create an array, filled with a value.
/// ```
/// use oceanfv::array::{shape, ArrND};
///
/// let arr = ArrND::full(1f64, shape([2, 2]));
///
/// assert_eq!(arr[[0, 0]], 1.0);
/// assert_eq!(arr[[1, 0]], 1.0);
/// assert_eq!(arr[[0, 1]], 1.0);
/// assert_eq!(arr[[1, 1]], 1.0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ArrND<const ND: usize, I> {
    shape: Shape<ND>,
    data: Box<[I]>,
}

impl<const ND: usize, I> ArrND<ND, I> {
    #[inline]
    fn flatten_index(&self, index: Ix<ND>) -> usize {
        let shape = self.shape;
        let mut sum = index[ND - 1];
        let mut stride = 1;
        for d in (0..ND - 1).rev() {
            stride *= shape[d + 1];
            sum += index[d] * stride;
        }
        sum
    }

    /// Flat view of the data in memory order.
    pub fn as_slice(&self) -> &[I] {
        &self.data
    }

    /// Mutable flat view of the data in memory order.
    pub fn as_mut_slice(&mut self) -> &mut [I] {
        &mut self.data
    }
}

impl<const ND: usize, I: Copy> ArrND<ND, I> {
    /// Create a new array with all elements set to a constant value.
    pub fn full(item: I, shape: Shape<ND>) -> Self {
        ArrND {
            shape,
            data: vec![item; shape.size()].into_boxed_slice(),
        }
    }
}

impl<const ND: usize, I> Index<Ix<ND>> for ArrND<ND, I> {
    type Output = I;
    #[inline]
    fn index(&self, index: Ix<ND>) -> &I {
        &self.data[self.flatten_index(index)]
    }
}

impl<const ND: usize, I> IndexMut<Ix<ND>> for ArrND<ND, I> {
    #[inline]
    fn index_mut(&mut self, index: Ix<ND>) -> &mut Self::Output {
        let flat = self.flatten_index(index);
        &mut self.data[flat]
    }
}
