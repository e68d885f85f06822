//! Shared fixtures for reconstruction verification.
//!
//! Provides analytic ellipsoid phantoms (including the 3-D Shepp-Logan
//! head phantom), an exact cone-beam forward projector for them, and the
//! voxelization used as ground truth. Reconstruction accuracy tests
//! forward-project a phantom with the scan geometry under test, run the
//! engine on the synthetic scan, and compare against the sampled phantom.

#![warn(missing_docs)]

use cbct_core::{DetectorGeometry, ImageBuffer, VolumeBuffer, VolumeGeometry};

/// One ellipsoid of an analytic phantom.
///
/// The ellipsoid is centered at `center`, has semi-axes `axes`, and is
/// rotated by `theta` radians about the z axis. Densities are additive
/// where ellipsoids overlap.
#[derive(Debug, Clone, Copy)]
pub struct Ellipsoid {
    /// World-space center.
    pub center: [f32; 3],
    /// Semi-axes along the (rotated) x, y, z directions.
    pub axes: [f32; 3],
    /// Rotation about z, radians.
    pub theta: f32,
    /// Additive density inside the ellipsoid.
    pub density: f32,
}

impl Ellipsoid {
    /// The quadratic level of a point: < 1 inside, 1 on the surface.
    pub fn level(&self, p: [f32; 3]) -> f32 {
        let dx = p[0] - self.center[0];
        let dy = p[1] - self.center[1];
        let dz = p[2] - self.center[2];
        let (sin_t, cos_t) = self.theta.sin_cos();
        let rx = dx * cos_t + dy * sin_t;
        let ry = -dx * sin_t + dy * cos_t;
        let [a, b, c] = self.axes;
        (rx / a) * (rx / a) + (ry / b) * (ry / b) + (dz / c) * (dz / c)
    }

    /// Length of the intersection of the ray `origin + t * dir` (with
    /// `dir` a unit vector) and this ellipsoid.
    pub fn chord(&self, origin: [f32; 3], dir: [f32; 3]) -> f32 {
        // Map into the frame where the ellipsoid is the unit sphere.
        let (sin_t, cos_t) = self.theta.sin_cos();
        let [a, b, c] = self.axes;
        let to_local = |v: [f32; 3], translate: bool| -> [f32; 3] {
            let (x, y, z) = if translate {
                (v[0] - self.center[0], v[1] - self.center[1], v[2] - self.center[2])
            } else {
                (v[0], v[1], v[2])
            };
            [
                (x * cos_t + y * sin_t) / a,
                (-x * sin_t + y * cos_t) / b,
                z / c,
            ]
        };
        let o = to_local(origin, true);
        let d = to_local(dir, false);

        // |o + t d|^2 = 1, solved for t in world-scaled units.
        let qa = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
        let qb = 2.0 * (o[0] * d[0] + o[1] * d[1] + o[2] * d[2]);
        let qc = o[0] * o[0] + o[1] * o[1] + o[2] * o[2] - 1.0;
        let disc = qb * qb - 4.0 * qa * qc;
        if disc <= 0.0 || qa == 0.0 {
            return 0.0;
        }
        // dir is unit length in world space, so t2 - t1 is the chord.
        disc.sqrt() / qa
    }
}

/// An additive ellipsoid phantom.
#[derive(Debug, Clone)]
pub struct Phantom {
    /// The ellipsoids, densities additive.
    pub ellipsoids: Vec<Ellipsoid>,
}

impl Phantom {
    /// The 3-D Shepp-Logan head phantom (modified low-contrast variant),
    /// scaled so the outer skull ellipsoid has semi-axes
    /// `scale * (0.69, 0.92, 0.81)`.
    pub fn shepp_logan(scale: f32) -> Self {
        let deg = std::f32::consts::PI / 180.0;
        let e = |center: [f32; 3], axes: [f32; 3], theta_deg: f32, density: f32| Ellipsoid {
            center: center.map(|c| c * scale),
            axes: axes.map(|a| a * scale),
            theta: theta_deg * deg,
            density,
        };
        Self {
            ellipsoids: vec![
                e([0.0, 0.0, 0.0], [0.69, 0.92, 0.81], 0.0, 1.0),
                e([0.0, -0.0184, 0.0], [0.6624, 0.874, 0.78], 0.0, -0.8),
                e([0.22, 0.0, 0.0], [0.11, 0.31, 0.22], -18.0, -0.2),
                e([-0.22, 0.0, 0.0], [0.16, 0.41, 0.28], 18.0, -0.2),
                e([0.0, 0.35, -0.15], [0.21, 0.25, 0.41], 0.0, 0.1),
                e([0.0, 0.1, 0.25], [0.046, 0.046, 0.05], 0.0, 0.1),
                e([0.0, -0.1, 0.25], [0.046, 0.046, 0.05], 0.0, 0.1),
                e([-0.08, -0.605, 0.0], [0.046, 0.023, 0.05], 0.0, 0.1),
                e([0.0, -0.605, 0.0], [0.023, 0.023, 0.02], 0.0, 0.1),
                e([0.06, -0.605, 0.0], [0.023, 0.046, 0.02], 0.0, 0.1),
            ],
        }
    }

    /// A single centered sphere.
    pub fn sphere(radius: f32, density: f32) -> Self {
        Self {
            ellipsoids: vec![Ellipsoid {
                center: [0.0, 0.0, 0.0],
                axes: [radius, radius, radius],
                theta: 0.0,
                density,
            }],
        }
    }

    /// Density at a world point.
    pub fn density_at(&self, p: [f32; 3]) -> f32 {
        self.ellipsoids
            .iter()
            .filter(|e| e.level(p) <= 1.0)
            .map(|e| e.density)
            .sum()
    }

    /// Distance of the point from the nearest ellipsoid surface, in level
    /// units (0 on a surface, large away from all surfaces). Used to mask
    /// out voxels whose ground truth is ambiguous at finite resolution.
    pub fn boundary_margin(&self, p: [f32; 3]) -> f32 {
        self.ellipsoids
            .iter()
            .map(|e| (e.level(p) - 1.0).abs())
            .fold(f32::INFINITY, f32::min)
    }

    /// Line integral of the density along the ray `origin + t * dir`
    /// (`dir` unit length).
    pub fn line_integral(&self, origin: [f32; 3], dir: [f32; 3]) -> f32 {
        self.ellipsoids
            .iter()
            .map(|e| e.density * e.chord(origin, dir))
            .sum()
    }
}

/// Exact cone-beam projections of a phantom for a scan geometry.
///
/// The source orbits at `d_so` in the `x`/`y` plane; detector pixel
/// `(u, v)` of the view at angle `phi` sees the ray from the source
/// through the point of the isocenter plane its back-projection formulas
/// address. Values are analytic line integrals, so the only error in a
/// round trip is the reconstruction's own discretization.
pub fn forward_project(phantom: &Phantom, det: &DetectorGeometry) -> Vec<ImageBuffer> {
    let h_min = det.h_min();
    let v_min = det.v_min();

    (0..det.num_projections)
        .map(|index| {
            let phi = index as f32 * det.delta_phi;
            let (sin_phi, cos_phi) = phi.sin_cos();
            let source = [-det.d_so * sin_phi, det.d_so * cos_phi, 0.0];

            let mut image = ImageBuffer::new(det.n_h, det.n_v);
            for v in 0..det.n_v {
                let v_w = v as f32 * det.pitch_v + v_min + det.pitch_v / 2.0;
                for u in 0..det.n_h {
                    let u_w = u as f32 * det.pitch_h + h_min + det.pitch_h / 2.0;
                    // The ray pierces the isocenter plane (t = 0) at
                    // (s, z) = (u_w, v_w).
                    let through = [u_w * cos_phi, u_w * sin_phi, v_w];
                    let delta = [
                        through[0] - source[0],
                        through[1] - source[1],
                        through[2] - source[2],
                    ];
                    let len =
                        (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
                    let dir = [delta[0] / len, delta[1] / len, delta[2] / len];

                    image.data_mut()[v as usize * det.n_h as usize + u as usize] =
                        phantom.line_integral(source, dir);
                }
            }
            image
        })
        .collect()
}

/// Samples the phantom at the voxel centers of a grid.
pub fn sample_volume(phantom: &Phantom, vol: &VolumeGeometry) -> VolumeBuffer {
    let mut buffer = VolumeBuffer::new(*vol);
    let mut slab = vec![0.0f32; vol.voxel_count()];
    let mut i = 0;
    for z in 0..vol.n_z {
        let z_w = vol.voxel_center_z(z);
        for y in 0..vol.n_y {
            let y_w = vol.voxel_center_y(y);
            for x in 0..vol.n_x {
                slab[i] = phantom.density_at([vol.voxel_center_x(x), y_w, z_w]);
                i += 1;
            }
        }
    }
    buffer
        .place_slab(0, vol.n_z, &slab)
        .expect("slab matches volume");
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_chord() {
        let sphere = Phantom::sphere(10.0, 1.0);
        // A diameter through the center.
        let through = sphere.line_integral([-100.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        assert!((through - 20.0).abs() < 1e-3);
        // A ray at half the radius: chord = 2 sqrt(r^2 - d^2).
        let offset = sphere.line_integral([-100.0, 5.0, 0.0], [1.0, 0.0, 0.0]);
        assert!((offset - 2.0 * (100.0f32 - 25.0).sqrt()).abs() < 1e-3);
        // A miss.
        assert_eq!(sphere.line_integral([-100.0, 11.0, 0.0], [1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rotated_ellipsoid_chord() {
        // A flat ellipsoid rotated 90 degrees: the long axis now points
        // along y.
        let e = Ellipsoid {
            center: [0.0, 0.0, 0.0],
            axes: [8.0, 2.0, 2.0],
            theta: std::f32::consts::FRAC_PI_2,
            density: 1.0,
        };
        let along_y = e.chord([0.0, -100.0, 0.0], [0.0, 1.0, 0.0]);
        assert!((along_y - 16.0).abs() < 1e-3);
        let along_x = e.chord([-100.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        assert!((along_x - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_shepp_logan_densities() {
        let phantom = Phantom::shepp_logan(40.0);
        // Skull shell: full density.
        assert!((phantom.density_at([0.0, 0.9 * 40.0 * 0.92 + 2.0, 0.0]) - 1.0).abs() < 1e-6);
        // Brain interior: 1.0 - 0.8 = 0.2.
        assert!((phantom.density_at([0.0, 0.0, 0.0]) - 0.2).abs() < 1e-6);
        // Outside.
        assert_eq!(phantom.density_at([80.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_projection_symmetry() {
        // A centered sphere projects identically at every angle.
        let det = DetectorGeometry {
            n_h: 16,
            n_v: 8,
            pitch_h: 2.0,
            pitch_v: 2.0,
            d_so: 200.0,
            d_sd: 400.0,
            delta_phi: std::f32::consts::TAU / 4.0,
            num_projections: 4,
        };
        let views = forward_project(&Phantom::sphere(8.0, 1.0), &det);
        for view in &views[1..] {
            for (a, b) in views[0].data().iter().zip(view.data()) {
                assert!((a - b).abs() < 1e-3);
            }
        }
    }
}
