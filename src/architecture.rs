//! Selects where kernels run.
//!
//! Kernels are written once as a function of the row they fill. The architecture decides
//! whether rows are processed one after another or distributed over a rayon thread pool.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Execution backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Architecture {
    /// Serial execution on the calling thread.
    #[default]
    Cpu,
    /// Rows distributed over the rayon thread pool. Requires the `parallel` feature.
    Threaded,
}

impl Architecture {
    /// All architectures that are compiled into this build.
    pub fn available() -> Vec<Architecture> {
        [Architecture::Cpu, Architecture::Threaded]
            .into_iter()
            .filter(|a| a.is_available())
            .collect()
    }

    pub fn is_available(self) -> bool {
        match self {
            Architecture::Cpu => true,
            Architecture::Threaded => cfg!(feature = "parallel"),
        }
    }

    /// Call `f(row_index, row)` for every chunk of `row_len` elements of `data`.
    pub fn for_each_row<F>(self, data: &mut [f64], row_len: usize, f: F)
    where
        F: Fn(usize, &mut [f64]) + Send + Sync,
    {
        match self {
            #[cfg(feature = "parallel")]
            Architecture::Threaded => data
                .par_chunks_mut(row_len)
                .enumerate()
                .for_each(|(r, row)| f(r, row)),
            _ => data
                .chunks_mut(row_len)
                .enumerate()
                .for_each(|(r, row)| f(r, row)),
        }
    }

    /// Sum of `f(n)` for `n in 0..len`.
    pub fn sum<F>(self, len: usize, f: F) -> f64
    where
        F: Fn(usize) -> f64 + Send + Sync,
    {
        match self {
            #[cfg(feature = "parallel")]
            Architecture::Threaded => (0..len).into_par_iter().map(f).sum(),
            _ => (0..len).map(f).sum(),
        }
    }

    /// Euclidean inner product.
    pub fn dot(self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        self.sum(a.len(), |n| a[n] * b[n])
    }

    /// Replace every element by `f(n, old)`.
    pub fn update<F>(self, data: &mut [f64], f: F)
    where
        F: Fn(usize, f64) -> f64 + Send + Sync,
    {
        match self {
            #[cfg(feature = "parallel")]
            Architecture::Threaded => data
                .par_iter_mut()
                .enumerate()
                .for_each(|(n, x)| *x = f(n, *x)),
            _ => data
                .iter_mut()
                .enumerate()
                .for_each(|(n, x)| *x = f(n, *x)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Architecture;

    #[test]
    fn cpu_is_always_available() {
        assert!(Architecture::available().contains(&Architecture::Cpu));
        assert_eq!(
            Architecture::Threaded.is_available(),
            cfg!(feature = "parallel")
        );
    }

    #[test]
    fn rows_are_visited_with_their_index() {
        for arch in Architecture::available() {
            let mut data = vec![0.0; 12];
            arch.for_each_row(&mut data, 4, |r, row| row.iter_mut().for_each(|x| *x = r as f64));
            assert_eq!(data, [0., 0., 0., 0., 1., 1., 1., 1., 2., 2., 2., 2.]);
        }
    }

    #[test]
    fn reductions_agree_between_backends() {
        let a: Vec<f64> = (0..100).map(|n| n as f64).collect();
        for arch in Architecture::available() {
            assert_eq!(arch.dot(&a, &a), 328350.0);
            assert_eq!(arch.sum(4, |n| n as f64), 6.0);
            let mut b = a.clone();
            arch.update(&mut b, |n, x| x - n as f64);
            assert!(b.iter().all(|&x| x == 0.0));
        }
    }
}
