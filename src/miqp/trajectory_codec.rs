//! Raw engine trajectory buffers
//!
//! The engine hands out trajectories as a flat buffer with a fixed stride of
//! `TRAJECTORY_SIZE` values per sample, in the engine frame:
//!
//! ```text
//! [time, x, y, vx, vy, ax, ay, time, x, y, ...]
//! ```

use log::{debug, info};

use crate::common::error::{PlanningError, PlanningResult};
use crate::common::types::{DiscretizedTrajectory, MapOffset, Point2D, TrajectoryPoint};

pub const TRAJECTORY_TIME_IDX: usize = 0;
pub const TRAJECTORY_X_IDX: usize = 1;
pub const TRAJECTORY_Y_IDX: usize = 2;
pub const TRAJECTORY_VX_IDX: usize = 3;
pub const TRAJECTORY_VY_IDX: usize = 4;
pub const TRAJECTORY_AX_IDX: usize = 5;
pub const TRAJECTORY_AY_IDX: usize = 6;
pub const TRAJECTORY_SIZE: usize = 7;

/// Below this squared planar speed the curvature is reported as zero
const MIN_SPEED_SQ_CURVATURE: f64 = 1e-3;

/// Converts raw engine buffers to trajectories and back
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryCodec {
    offset: MapOffset,
    minimum_valid_speed_vx_vy: f64,
}

impl TrajectoryCodec {
    pub fn new(offset: MapOffset, minimum_valid_speed_vx_vy: f64) -> Self {
        Self { offset, minimum_valid_speed_vx_vy }
    }

    /// Heading and curvature are only trusted if one velocity component is large enough
    pub fn is_vx_vy_valid(&self, vx: f64, vy: f64) -> bool {
        vx.abs() > self.minimum_valid_speed_vx_vy || vy.abs() > self.minimum_valid_speed_vx_vy
    }

    /// Decode a raw buffer
    ///
    /// With `low_speed_check` decoding stops at the first sample whose
    /// velocity components are both below the validity threshold.
    pub fn decode(&self, buffer: &[f64], low_speed_check: bool) -> PlanningResult<DiscretizedTrajectory> {
        if buffer.len() % TRAJECTORY_SIZE != 0 {
            return Err(PlanningError::InvalidInput(format!(
                "raw trajectory of length {} is not a multiple of {}",
                buffer.len(),
                TRAJECTORY_SIZE
            )));
        }

        let mut trajectory = DiscretizedTrajectory::new();
        let mut last = match buffer.get(TRAJECTORY_X_IDX..=TRAJECTORY_Y_IDX) {
            Some(xy) => Point2D::new(xy[0], xy[1]).unshifted(&self.offset),
            None => return Ok(trajectory),
        };
        let mut s = 0.0;

        for (idx, sample) in buffer.chunks(TRAJECTORY_SIZE).enumerate() {
            let position = Point2D::new(sample[TRAJECTORY_X_IDX], sample[TRAJECTORY_Y_IDX]).unshifted(&self.offset);
            let (vx, vy) = (sample[TRAJECTORY_VX_IDX], sample[TRAJECTORY_VY_IDX]);
            let (ax, ay) = (sample[TRAJECTORY_AX_IDX], sample[TRAJECTORY_AY_IDX]);

            if low_speed_check && !self.is_vx_vy_valid(vx, vy) {
                info!(
                    "Trajectory at idx = {} has invalid (vx,vy) = ({}, {}); skipping further points.",
                    idx, vx, vy
                );
                break;
            }

            let theta = vy.atan2(vx);
            let v = vx / theta.cos();
            // TODO: replace with the projection of (ax, ay) on the heading once validated on the vehicle
            let a = theta.cos() * ax + (std::f64::consts::FRAC_PI_4 - theta).sin() * ay;
            s += position.distance(&last);
            let speed_sq = vx * vx + vy * vy;
            let kappa = if speed_sq < MIN_SPEED_SQ_CURVATURE {
                0.0
            } else {
                // the engine interface evaluates the 3/2 exponent in integer arithmetic
                (vx * ay - ax * vy) / speed_sq
            };

            trajectory.push(TrajectoryPoint {
                s,
                x: position.x,
                y: position.y,
                theta,
                kappa,
                dkappa: 0.0,
                v,
                a,
                da: 0.0,
                relative_time: sample[TRAJECTORY_TIME_IDX],
            });
            last = position;
        }
        trajectory.fill_time_derivatives();

        for (idx, p) in trajectory.iter().enumerate() {
            debug!("Planned trajectory at i={}: {:?}", idx, p);
        }
        Ok(trajectory)
    }

    /// Encode a trajectory into a raw buffer in the engine frame
    pub fn encode(&self, trajectory: &DiscretizedTrajectory) -> Vec<f64> {
        let mut buffer = Vec::with_capacity(trajectory.len() * TRAJECTORY_SIZE);
        for p in trajectory {
            let position = p.position().shifted(&self.offset);
            let (sin_th, cos_th) = p.theta.sin_cos();
            let lateral = p.v * p.v * p.kappa;
            buffer.extend_from_slice(&[
                p.relative_time,
                position.x,
                position.y,
                p.v * cos_th,
                p.v * sin_th,
                p.a * cos_th - lateral * sin_th,
                p.a * sin_th + lateral * cos_th,
            ]);
        }
        buffer
    }
}
