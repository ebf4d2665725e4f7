//! Integration rules.
//!
//! A rule is an externally constructed, finite, re-iterable sequence of
//! reference points with associated weights. The assembly engine performs no
//! quadrature-order inference: matching the rule to the integrand's
//! polynomial degree is the caller's responsibility.
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, OPoint, Scalar, U1, U2, U3};
use std::iter::FusedIterator;
use std::slice;

/// Weights and points of an owned quadrature rule.
pub type QuadraturePair<T, D> = (Vec<T>, Vec<OPoint<T, D>>);
pub type QuadraturePair1d<T> = QuadraturePair<T, U1>;
pub type QuadraturePair2d<T> = QuadraturePair<T, U2>;
pub type QuadraturePair3d<T> = QuadraturePair<T, U3>;

/// A quadrature rule consisting of weights and points.
pub trait Quadrature<T, D>: Sync
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn weights(&self) -> &[T];
    fn points(&self) -> &[OPoint<T, D>];

    fn num_points(&self) -> usize {
        self.weights().len()
    }

    fn iter(&self) -> QuadratureIter<'_, T, D> {
        QuadratureIter {
            weights_iter: self.weights().iter(),
            points_iter: self.points().iter(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuadratureIter<'a, T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    weights_iter: slice::Iter<'a, T>,
    points_iter: slice::Iter<'a, OPoint<T, D>>,
}

impl<'a, T, D> Iterator for QuadratureIter<'a, T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    type Item = (&'a T, &'a OPoint<T, D>);

    fn next(&mut self) -> Option<Self::Item> {
        Some((self.weights_iter.next()?, self.points_iter.next()?))
    }
}

impl<'a, T, D> FusedIterator for QuadratureIter<'a, T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
}

impl<T, D, A, B> Quadrature<T, D> for (A, B)
where
    T: Scalar,
    D: DimName,
    A: AsRef<[T]> + Sync,
    B: AsRef<[OPoint<T, D>]> + Sync,
    DefaultAllocator: Allocator<T, D>,
{
    fn weights(&self) -> &[T] {
        self.0.as_ref()
    }

    fn points(&self) -> &[OPoint<T, D>] {
        self.1.as_ref()
    }
}

impl<T, D, X> Quadrature<T, D> for &X
where
    T: Scalar,
    D: DimName,
    X: Quadrature<T, D> + ?Sized,
    DefaultAllocator: Allocator<T, D>,
{
    fn weights(&self) -> &[T] {
        X::weights(self)
    }

    fn points(&self) -> &[OPoint<T, D>] {
        X::points(self)
    }
}
