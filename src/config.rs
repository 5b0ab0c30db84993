//! Planner configuration
//!
//! Every field falls back to its own default when it is missing from the
//! TOML file, so a partial file only overrides what it names.

use std::fs::read_to_string;
use std::path::Path;

use serde::Deserialize;

use crate::common::error::ConfigError;
use crate::common::types::MapOffset;
use crate::smoothing::optimizer::SolverParameters;
use crate::smoothing::smoother::ProblemParameters;

/// Vehicle geometry
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    pub length: f64,
    pub width: f64,
    /// Distance from the rear edge to the reference point
    pub back_edge_to_center: f64,
    pub wheel_base: f64,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self { length: 4.933, width: 2.11, back_edge_to_center: 1.043, wheel_base: 2.8448 }
    }
}

/// Warm start strategy of the combinatorial engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmstartType {
    NoWarmstart,
    RecedingHorizon,
    LastSolution,
}

impl Default for WarmstartType {
    fn default() -> Self {
        WarmstartType::NoWarmstart
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MiqpPlannerConfig {
    // map origin used to shift every coordinate handed to the engine
    pub pts_offset_x: f64,
    pub pts_offset_y: f64,

    // state determination and targets
    pub minimum_valid_speed_planning: f64,
    pub standstill_velocity_threshold: f64,
    pub destination_distance_stop_threshold: f64,
    pub distance_start_slowdown: f64,
    pub distance_stop_before: f64,
    pub delta_s_desired: f64,
    pub default_cruise_speed: f64,
    pub cutoff_distance_reference_after_stop: f64,

    // pipeline switches
    pub use_environment_polygon: bool,
    pub consider_obstacles: bool,
    pub use_smoothing: bool,
    pub smoothing_subsampling: usize,
    pub minimum_percentage_valid_miqp_points: f64,
    pub minimum_valid_speed_vx_vy: f64,

    // obstacles
    pub extension_length_static: f64,
    pub extension_width_static: f64,
    pub merge_static_obstacles: bool,
    pub static_obstacle_distance_criteria: f64,
    pub extension_length_dynamic: f64,

    // combinatorial engine
    pub nr_regions: usize,
    pub max_velocity_fitting: f64,
    pub nr_steps: usize,
    pub nr_neighbouring_possible_regions: usize,
    pub ts: f64,
    pub max_solution_time: f64,
    pub relative_mip_gap_tolerance: f64,
    pub mipemphasis: i32,
    pub relobjdif: f64,
    pub minimum_region_change_speed: f64,
    pub additional_steps_for_reference_longer_horizon: usize,
    pub use_sos: bool,
    pub use_branching_priorities: bool,
    pub warmstart_type: WarmstartType,
    pub collision_radius_add: f64,
    pub wheelbase_add: f64,
    pub jerk_weight: f64,
    pub position_weight: f64,
    pub velocity_weight: f64,
    pub obstacle_roi_filter: bool,
    pub obstacle_roi_behind_distance: f64,
    pub obstacle_roi_front_distance: f64,
    pub obstacle_roi_side_distance: f64,
    pub acc_lon_max_limit: f64,
    pub acc_lon_min_limit: f64,
    pub jerk_lon_max_limit: f64,
    pub acc_lat_min_max_limit: f64,
    pub jerk_lat_min_max_limit: f64,

    pub vehicle: VehicleParams,
    pub smoother: ProblemParameters,
    pub smoother_solver: SolverParameters,
}

impl Default for MiqpPlannerConfig {
    fn default() -> Self {
        Self {
            pts_offset_x: 0.0,
            pts_offset_y: 0.0,
            minimum_valid_speed_planning: 1.0,
            standstill_velocity_threshold: 0.1,
            destination_distance_stop_threshold: 3.0,
            distance_start_slowdown: 30.0,
            distance_stop_before: 3.0,
            delta_s_desired: 0.0,
            default_cruise_speed: 5.0,
            cutoff_distance_reference_after_stop: 10.0,
            use_environment_polygon: false,
            consider_obstacles: true,
            use_smoothing: false,
            smoothing_subsampling: 3,
            minimum_percentage_valid_miqp_points: 0.5,
            minimum_valid_speed_vx_vy: 0.5,
            extension_length_static: 0.0,
            extension_width_static: 0.0,
            merge_static_obstacles: true,
            static_obstacle_distance_criteria: 2.0,
            extension_length_dynamic: 2.0,
            nr_regions: 16,
            max_velocity_fitting: 10.0,
            nr_steps: 20,
            nr_neighbouring_possible_regions: 1,
            ts: 0.25,
            max_solution_time: 5.0,
            relative_mip_gap_tolerance: 0.1,
            mipemphasis: 1,
            relobjdif: 0.9,
            minimum_region_change_speed: 2.0,
            additional_steps_for_reference_longer_horizon: 2,
            use_sos: false,
            use_branching_priorities: true,
            warmstart_type: WarmstartType::NoWarmstart,
            collision_radius_add: 0.0,
            wheelbase_add: 0.0,
            jerk_weight: 1.0,
            position_weight: 2.0,
            velocity_weight: 0.0,
            obstacle_roi_filter: false,
            obstacle_roi_behind_distance: 5.0,
            obstacle_roi_front_distance: 30.0,
            obstacle_roi_side_distance: 15.0,
            acc_lon_max_limit: 2.0,
            acc_lon_min_limit: -4.0,
            jerk_lon_max_limit: 3.0,
            acc_lat_min_max_limit: 1.6,
            jerk_lat_min_max_limit: 1.4,
            vehicle: VehicleParams::default(),
            smoother: ProblemParameters::default(),
            smoother_solver: SolverParameters::default(),
        }
    }
}

impl MiqpPlannerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn map_offset(&self) -> MapOffset {
        MapOffset::new(self.pts_offset_x, self.pts_offset_y)
    }

    /// Minimum number of decoded points a trajectory must keep
    pub fn minimum_valid_points(&self) -> usize {
        (self.minimum_percentage_valid_miqp_points * self.nr_steps as f64).ceil() as usize
    }
}

/// Load the planner configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MiqpPlannerConfig, ConfigError> {
    let s = read_to_string(path)?;
    MiqpPlannerConfig::from_toml_str(&s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smoothing::optimizer::Algorithm;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = MiqpPlannerConfig::from_toml_str("").unwrap();
        assert_eq!(config, MiqpPlannerConfig::default());
        assert_eq!(config.nr_steps, 20);
        assert!((config.ts - 0.25).abs() < 1e-12);
        assert!((config.acc_lon_min_limit + 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config = MiqpPlannerConfig::from_toml_str(
            r#"
            nr_steps = 30
            use_smoothing = true
            warmstart_type = "last_solution"

            [vehicle]
            width = 1.8

            [smoother]
            upper_bound_velocity = 20.0

            [smoother_solver]
            algorithm = "projected_gradient"
            max_num_evals = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.nr_steps, 30);
        assert!(config.use_smoothing);
        assert_eq!(config.warmstart_type, WarmstartType::LastSolution);
        assert!((config.vehicle.width - 1.8).abs() < 1e-12);
        assert!((config.vehicle.length - 4.933).abs() < 1e-12);
        assert!((config.smoother.upper_bound_velocity - 20.0).abs() < 1e-12);
        assert!((config.smoother.cost_curvature - 1e2).abs() < 1e-12);
        assert_eq!(config.smoother_solver.algorithm, Algorithm::ProjectedGradient);
        assert_eq!(config.smoother_solver.max_num_evals, 50);
        assert!((config.smoother_solver.max_time - 0.15).abs() < 1e-12);
        // untouched scalar fields are never zeroed
        assert!((config.default_cruise_speed - 5.0).abs() < 1e-12);
        assert_eq!(config.nr_regions, 16);
    }

    #[test]
    fn test_invalid_toml() {
        let result = MiqpPlannerConfig::from_toml_str("nr_steps = \"many\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/miqp_planner.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_minimum_valid_points() {
        let config = MiqpPlannerConfig { minimum_percentage_valid_miqp_points: 0.5, nr_steps: 21, ..Default::default() };
        assert_eq!(config.minimum_valid_points(), 11);
    }
}
