// Closed-loop simulation of the MIQP planner on a straight road with a
// parked car and a stop point.
//
// usage: miqp_planner [config.toml]
use log::{error, info, LevelFilter};

use miqp_planning::common::{DiscretizedTrajectory, Point2D, TrajectoryPoint};
use miqp_planning::config::{load_config, MiqpPlannerConfig};
use miqp_planning::geometry::OrientedBox2d;
use miqp_planning::logger::logger_init;
use miqp_planning::miqp::{
    MiqpEngineSettings, MiqpPlanner, Obstacle, PlannerState, PlanningInput, ReferenceTrackingEngine, RoadBoundaries,
};
use miqp_planning::smoothing::ProjectedGradientOptimizer;

const DESTINATION_X: f64 = 60.0;
const MAX_CYCLES: usize = 200;

fn main() {
    if let Err(e) = logger_init(LevelFilter::Info) {
        eprintln!("{}", e);
        return;
    }

    let config = match std::env::args().nth(1) {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("Could not load {}: {}", path, e);
                return;
            }
        },
        None => MiqpPlannerConfig::default(),
    };
    let ts = config.ts;

    let reference: Vec<Point2D> = (0..=80).map(|i| Point2D::new(i as f64, 0.0)).collect();
    let road = RoadBoundaries {
        left: vec![Point2D::new(-10.0, 4.0), Point2D::new(90.0, 4.0)],
        right: vec![Point2D::new(-10.0, -4.0), Point2D::new(90.0, -4.0)],
    };
    let obstacles = vec![Obstacle::new_static(
        "parked_car",
        OrientedBox2d::new(Point2D::new(25.0, 3.5), 0.0, 4.5, 1.8),
    )];

    let engine = ReferenceTrackingEngine::new(MiqpEngineSettings::from_config(&config));
    let mut planner = MiqpPlanner::new(config, engine, ProjectedGradientOptimizer::new());

    let mut state = TrajectoryPoint { v: 3.0, ..Default::default() };
    let mut last_trajectory = DiscretizedTrajectory::new();

    for cycle in 0..MAX_CYCLES {
        let timestamp = cycle as f64 * ts;
        let input = PlanningInput {
            init_point: state,
            timestamp,
            reference_line: &reference,
            stop_distance: DESTINATION_X - state.x,
            road_boundaries: Some(&road),
            obstacles: &obstacles,
        };

        match planner.plan(&input) {
            Ok(outcome) => {
                println!(
                    "t = {:6.2} state = {:?} x = {:6.2} v = {:5.2} points = {} collision = {}",
                    timestamp,
                    outcome.state,
                    state.x,
                    state.v,
                    outcome.trajectory.len(),
                    outcome.collisions.any()
                );
                if outcome.state == PlannerState::Standstill {
                    info!("Reached the destination after {} cycles", cycle);
                    break;
                }
                last_trajectory = outcome.trajectory;
            }
            Err(e) => error!("Cycle {} failed: {}, following the previous trajectory", cycle, e),
        }

        // advance one sample along the current plan, times stay relative to the cycle
        match last_trajectory.iter().find(|p| p.relative_time >= ts - 1e-9).copied() {
            Some(next) => {
                state = TrajectoryPoint { s: 0.0, relative_time: 0.0, ..next };
                last_trajectory = DiscretizedTrajectory::from_points(
                    last_trajectory
                        .iter()
                        .map(|p| TrajectoryPoint { relative_time: p.relative_time - ts, ..*p })
                        .collect(),
                );
            }
            _ => {
                error!("No trajectory left to follow");
                break;
            }
        }
    }
}
