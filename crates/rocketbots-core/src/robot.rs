//! Robot control policies and the fixed sensor rig.
//!
//! All three policies consume the same rig (left/right pairs for lights,
//! robots, obstacles, and targets) and produce wheel speeds; the
//! differential-drive mapping into forward speed and turn lives here too so
//! every robot variant shares one motion model.

use crate::arena::ObjectSnapshot;
use crate::color::Color;
use crate::config::SimConfig;
use crate::geometry::{Bounds, Location};
use crate::object::{PhysicalObject, SenseCategory};
use crate::sensor::Sensor;
use crate::ObjectId;
use rocketbots_brain::NeuralNetwork;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Width of the input vector fed to network policies. The order is a fixed
/// contract: left robot, right robot, left obstacle, right obstacle, left
/// target, right target.
pub const NETWORK_INPUTS: usize = 6;
/// Output units consumed from network policies (left wheel, right wheel).
pub const NETWORK_OUTPUTS: usize = 2;

/// Errors raised when attaching a policy to a robot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("network topology {inputs}->{outputs} does not fit the sensor rig")]
    UnusableTopology { inputs: usize, outputs: usize },
}

/// One weighted sensor category of a complex robot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SensorChannel {
    pub enabled: bool,
    /// Crossed wiring: the left sensor drives the right motor and vice versa.
    pub crossed: bool,
    pub scale: f32,
}

impl Default for SensorChannel {
    fn default() -> Self {
        Self {
            enabled: false,
            crossed: false,
            scale: 1.0,
        }
    }
}

/// Reflex parameters for the complex robot: a weighted linear combination of
/// sensor readings per side, plus a cruising speed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ComplexParams {
    pub light: SensorChannel,
    pub robot: SensorChannel,
    pub obstacle: SensorChannel,
    pub target: SensorChannel,
    pub default_speed: f32,
}

/// A network policy: the network itself plus the description file it was
/// loaded from, which the world file references on save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeuralPolicy {
    source: PathBuf,
    network: NeuralNetwork,
}

impl NeuralPolicy {
    /// Bind a network to the rig, validating the topology up front so
    /// evaluation can never fail mid-tick.
    pub fn new(source: impl Into<PathBuf>, network: NeuralNetwork) -> Result<Self, PolicyError> {
        if network.input_size() != NETWORK_INPUTS || network.output_size() < NETWORK_OUTPUTS {
            return Err(PolicyError::UnusableTopology {
                inputs: network.input_size(),
                outputs: network.output_size(),
            });
        }
        Ok(Self {
            source: source.into(),
            network,
        })
    }

    /// Description file this network was loaded from.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[must_use]
    pub fn network(&self) -> &NeuralNetwork {
        &self.network
    }

    /// Mutable network access for external trainers; the topology is fixed,
    /// so weight edits cannot invalidate the rig contract.
    #[must_use]
    pub fn network_mut(&mut self) -> &mut NeuralNetwork {
        &mut self.network
    }
}

/// The pluggable per-robot control policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ControlPolicy {
    /// Drives straight at the configured default speed; ignores all sensors.
    Simple,
    Complex(ComplexParams),
    Neural(NeuralPolicy),
}

impl ControlPolicy {
    /// Stable tag used by the world file.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Complex(_) => "complex",
            Self::Neural(_) => "neural",
        }
    }

    /// Turn one tick's sensor readings into wheel speeds.
    #[must_use]
    pub fn decide(&self, readings: &SensorReadings, config: &SimConfig) -> WheelSpeeds {
        match self {
            Self::Simple => WheelSpeeds {
                left: config.robot_default_speed,
                right: config.robot_default_speed,
            },
            Self::Complex(params) => {
                let mut left = params.default_speed;
                let mut right = params.default_speed;
                for (channel, pair) in [
                    (&params.light, readings.light),
                    (&params.robot, readings.robot),
                    (&params.obstacle, readings.obstacle),
                    (&params.target, readings.target),
                ] {
                    if !channel.enabled {
                        continue;
                    }
                    let (for_left, for_right) = if channel.crossed {
                        (pair.right, pair.left)
                    } else {
                        (pair.left, pair.right)
                    };
                    left += for_left * config.speed_scale * channel.scale;
                    right += for_right * config.speed_scale * channel.scale;
                }
                WheelSpeeds { left, right }
            }
            Self::Neural(policy) => {
                let inputs = [
                    readings.robot.left,
                    readings.robot.right,
                    readings.obstacle.left,
                    readings.obstacle.right,
                    readings.target.left * config.target_sensor_gain,
                    readings.target.right * config.target_sensor_gain,
                ];
                let outputs = policy
                    .network()
                    .compute(&inputs)
                    .expect("policy construction validates the input width");
                let gain = config.speed_scale * config.neural_speed_scale;
                WheelSpeeds {
                    left: outputs[0] * gain,
                    right: outputs[1] * gain,
                }
            }
        }
    }
}

/// A left/right reading pair for one sensor category.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PairReading {
    pub left: f32,
    pub right: f32,
}

/// All readings a robot gathers in one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReadings {
    pub light: PairReading,
    pub robot: PairReading,
    pub obstacle: PairReading,
    pub target: PairReading,
}

/// Raw wheel speeds produced by a policy, before clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelSpeeds {
    pub left: f32,
    pub right: f32,
}

impl WheelSpeeds {
    /// Differential-drive mapping: clamp each wheel, average into forward
    /// speed, and turn by the (scaled, clamped) wheel difference. A faster
    /// left wheel turns the robot clockwise.
    #[must_use]
    pub fn into_command(self, config: &SimConfig) -> MotorCommand {
        let left = self.left.clamp(config.robot_min_speed, config.robot_max_speed);
        let right = self
            .right
            .clamp(config.robot_min_speed, config.robot_max_speed);
        MotorCommand {
            speed: (left + right) / 2.0,
            turn: ((right - left) * config.rotation_scale).clamp(-config.max_turn, config.max_turn),
        }
    }
}

/// The per-tick motion update applied to a robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorCommand {
    pub speed: f32,
    pub turn: f32,
}

/// The four left/right sensor pairs every robot carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorRig {
    light: SensorPair,
    robot: SensorPair,
    obstacle: SensorPair,
    target: SensorPair,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
struct SensorPair {
    left: Sensor,
    right: Sensor,
}

impl SensorPair {
    fn standard(category: SenseCategory, config: &SimConfig) -> Self {
        let offset = config.sensor_offset;
        Self {
            left: Sensor::new(
                Location::new(offset.x, offset.y),
                config.sensor_mount_angle,
                config.sensor_half_angle,
                category,
            ),
            right: Sensor::new(
                Location::new(offset.x, -offset.y),
                -config.sensor_mount_angle,
                config.sensor_half_angle,
                category,
            ),
        }
    }

    fn read(
        &self,
        parent: &PhysicalObject,
        parent_id: ObjectId,
        restrict: Option<ObjectId>,
        snapshot: &[ObjectSnapshot],
        bounds: Bounds,
        config: &SimConfig,
    ) -> PairReading {
        PairReading {
            left: self
                .left
                .sense(parent, parent_id, restrict, snapshot, bounds, config),
            right: self
                .right
                .sense(parent, parent_id, restrict, snapshot, bounds, config),
        }
    }
}

impl SensorRig {
    /// The standard rig built from the configured mount geometry.
    #[must_use]
    pub fn standard(config: &SimConfig) -> Self {
        Self {
            light: SensorPair::standard(SenseCategory::Light, config),
            robot: SensorPair::standard(SenseCategory::Robot, config),
            obstacle: SensorPair::standard(SenseCategory::Obstacle, config),
            target: SensorPair::standard(SenseCategory::Target, config),
        }
    }

    /// Run every pair over the snapshot. A robot with no bound target reads
    /// zero on the target channel; that is normal no-signal behavior, not an
    /// error.
    #[must_use]
    pub fn sense_all(
        &self,
        parent: &PhysicalObject,
        parent_id: ObjectId,
        target: Option<ObjectId>,
        snapshot: &[ObjectSnapshot],
        bounds: Bounds,
        config: &SimConfig,
    ) -> SensorReadings {
        SensorReadings {
            light: self
                .light
                .read(parent, parent_id, None, snapshot, bounds, config),
            robot: self
                .robot
                .read(parent, parent_id, None, snapshot, bounds, config),
            obstacle: self
                .obstacle
                .read(parent, parent_id, None, snapshot, bounds, config),
            target: if target.is_some() {
                self.target
                    .read(parent, parent_id, target, snapshot, bounds, config)
            } else {
                PairReading::default()
            },
        }
    }
}

/// Everything that makes a physical object a robot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RobotState {
    /// Heading-line color; pairs visually with the robot's target.
    pub line_color: Color,
    /// Target this robot seeks, when bound.
    pub target: Option<ObjectId>,
    pub policy: ControlPolicy,
    rig: SensorRig,
}

impl RobotState {
    /// Assemble a robot body: policy plus the standard rig.
    #[must_use]
    pub fn new(
        line_color: Color,
        target: Option<ObjectId>,
        policy: ControlPolicy,
        config: &SimConfig,
    ) -> Self {
        Self {
            line_color,
            target,
            policy,
            rig: SensorRig::standard(config),
        }
    }

    /// sense then decide: the whole per-robot read phase of one tick.
    #[must_use]
    pub fn decide(
        &self,
        parent: &PhysicalObject,
        parent_id: ObjectId,
        snapshot: &[ObjectSnapshot],
        bounds: Bounds,
        config: &SimConfig,
    ) -> MotorCommand {
        let readings = self
            .rig
            .sense_all(parent, parent_id, self.target, snapshot, bounds, config);
        self.policy.decide(&readings, config).into_command(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rocketbots_brain::{Activation, Layer};

    fn readings(target_left: f32, target_right: f32) -> SensorReadings {
        SensorReadings {
            target: PairReading {
                left: target_left,
                right: target_right,
            },
            ..SensorReadings::default()
        }
    }

    fn passthrough_network() -> NeuralNetwork {
        // 6 -> 2 identity: output 0 mirrors input 4, output 1 mirrors input 5.
        let mut weights = vec![0.0; 12];
        weights[4] = 1.0;
        weights[6 + 5] = 1.0;
        let layer = Layer::new(2, 6, weights, vec![0.0, 0.0]).expect("layer");
        NeuralNetwork::new(vec![layer], Activation::Identity).expect("network")
    }

    #[test]
    fn simple_policy_drives_straight() {
        let config = SimConfig::default();
        let speeds = ControlPolicy::Simple.decide(&readings(0.9, 0.1), &config);
        assert_eq!(speeds.left, config.robot_default_speed);
        assert_eq!(speeds.right, config.robot_default_speed);
        let command = speeds.into_command(&config);
        assert_eq!(command.turn, 0.0);
    }

    #[test]
    fn complex_policy_weights_enabled_channels() {
        let config = SimConfig::default();
        let params = ComplexParams {
            target: SensorChannel {
                enabled: true,
                crossed: false,
                scale: 2.0,
            },
            default_speed: 10.0,
            ..ComplexParams::default()
        };
        let speeds = ControlPolicy::Complex(params).decide(&readings(0.5, 0.25), &config);
        assert!((speeds.left - (10.0 + 0.5 * config.speed_scale * 2.0)).abs() < 1e-4);
        assert!((speeds.right - (10.0 + 0.25 * config.speed_scale * 2.0)).abs() < 1e-4);
    }

    #[test]
    fn crossed_wiring_swaps_sides() {
        let config = SimConfig::default();
        let mut params = ComplexParams {
            target: SensorChannel {
                enabled: true,
                crossed: true,
                scale: 1.0,
            },
            ..ComplexParams::default()
        };
        let crossed = ControlPolicy::Complex(params).decide(&readings(0.5, 0.0), &config);
        assert_eq!(crossed.left, 0.0);
        assert!(crossed.right > 0.0);

        params.target.crossed = false;
        let straight = ControlPolicy::Complex(params).decide(&readings(0.5, 0.0), &config);
        assert!(straight.left > 0.0);
        assert_eq!(straight.right, 0.0);
    }

    #[test]
    fn disabled_channels_contribute_nothing() {
        let config = SimConfig::default();
        let params = ComplexParams {
            default_speed: 5.0,
            ..ComplexParams::default()
        };
        let full = SensorReadings {
            light: PairReading {
                left: 1.0,
                right: 1.0,
            },
            robot: PairReading {
                left: 1.0,
                right: 1.0,
            },
            obstacle: PairReading {
                left: 1.0,
                right: 1.0,
            },
            target: PairReading {
                left: 1.0,
                right: 1.0,
            },
        };
        let speeds = ControlPolicy::Complex(params).decide(&full, &config);
        assert_eq!(speeds.left, 5.0);
        assert_eq!(speeds.right, 5.0);
    }

    #[test]
    fn neural_policy_validates_topology_up_front() {
        let narrow = Layer::new(2, 3, vec![0.0; 6], vec![0.0; 2]).expect("layer");
        let network = NeuralNetwork::new(vec![narrow], Activation::Identity).expect("network");
        let err = NeuralPolicy::new("weights.net", network).expect_err("must reject");
        assert_eq!(
            err,
            PolicyError::UnusableTopology {
                inputs: 3,
                outputs: 2
            }
        );
    }

    #[test]
    fn trainers_can_perturb_a_policy_network_in_place() {
        let mut policy = NeuralPolicy::new("weights.net", passthrough_network()).expect("policy");
        let before = policy.network().clone();
        let mut rng = SmallRng::seed_from_u64(11);
        policy.network_mut().mutate(&mut rng, 16, 1.0);
        assert_ne!(*policy.network(), before, "mutation must land in place");
        assert_eq!(policy.network().input_size(), NETWORK_INPUTS);
    }

    #[test]
    fn neural_policy_maps_outputs_to_wheels() {
        let config = SimConfig::default();
        let policy = NeuralPolicy::new("weights.net", passthrough_network()).expect("policy");
        let speeds = ControlPolicy::Neural(policy).decide(&readings(0.5, 0.25), &config);
        let gain = config.speed_scale * config.neural_speed_scale;
        assert!((speeds.left - 0.5 * config.target_sensor_gain * gain).abs() < 1e-3);
        assert!((speeds.right - 0.25 * config.target_sensor_gain * gain).abs() < 1e-3);
    }

    #[test]
    fn wheel_mapping_clamps_and_turns() {
        let config = SimConfig::default();
        let command = WheelSpeeds {
            left: 10_000.0,
            right: -10_000.0,
        }
        .into_command(&config);
        assert_eq!(
            command.speed,
            (config.robot_max_speed + config.robot_min_speed) / 2.0
        );
        assert_eq!(command.turn, -config.max_turn);

        let gentle = WheelSpeeds {
            left: 50.0,
            right: 60.0,
        }
        .into_command(&config);
        assert!((gentle.speed - 55.0).abs() < 1e-5);
        assert!((gentle.turn - 10.0 * config.rotation_scale).abs() < 1e-5);
    }
}
