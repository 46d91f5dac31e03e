//! Fixed step integration of continuous time models.
//!
//! The classic 4th order Runge-Kutta method. Local truncation error is O(dt^5), the global error O(dt^4).

use na::{allocator::Allocator, DefaultAllocator, Dim, RealField, VectorN};
use nalgebra as na;

use crate::models::VectorField;

/// Single step of the classic 4th-order Runge-Kutta method.
///
/// Advances `x` by `dt` using the vector field `f`.
///
/// ```
/// use ensemble_estimate::integrators::rk4_step;
/// use nalgebra::Vector1;
///
/// // dx/dt = -x (exponential decay)
/// let x = Vector1::new(1.0_f64);
/// let x1 = rk4_step(&|x: &Vector1<f64>| -x, &x, 0.01);
/// assert!((x1[0] - (-0.01_f64).exp()).abs() < 1e-10);
/// ```
pub fn rk4_step<N, D, F>(f: &F, x: &VectorN<N, D>, dt: N) -> VectorN<N, D>
where
    N: RealField,
    D: Dim,
    F: VectorField<N, D> + ?Sized,
    DefaultAllocator: Allocator<N, D>,
{
    let two: N = na::convert(2.0);
    let six: N = na::convert(6.0);
    let half_dt = dt / two;

    let k1 = f.derivative(x);
    let k2 = f.derivative(&(x + &k1 * half_dt));
    let k3 = f.derivative(&(x + &k2 * half_dt));
    let k4 = f.derivative(&(x + &k3 * dt));

    x + (k1 + (k2 + k3) * two + k4) * (dt / six)
}

/// Integrate a trajectory with `steps` fixed RK4 steps.
///
/// The trajectory includes the initial state so has `steps + 1` states.
pub fn integrate<N, D, F>(f: &F, x0: &VectorN<N, D>, dt: N, steps: usize) -> Vec<VectorN<N, D>>
where
    N: RealField,
    D: Dim,
    F: VectorField<N, D> + ?Sized,
    DefaultAllocator: Allocator<N, D>,
{
    let mut trajectory = Vec::with_capacity(steps + 1);
    trajectory.push(x0.clone());
    for k in 0..steps {
        let next = rk4_step(f, &trajectory[k], dt);
        trajectory.push(next);
    }
    trajectory
}
