//! Robot bridge TCP client: length-prefixed protobuf request/reply.
//!
//! The robot itself (drive, odometry, the eight-element sonar array) sits
//! behind a bridge daemon; this client is the only code that talks to it.
//! Everything above works through the [`RobotLink`] trait so tests can
//! substitute a scripted robot.

use crate::error::{MargaError, Result};
use crate::geom::Pose2D;
use prost::Message as ProstMessage;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Wire messages for the bridge protocol.
///
/// The protocol is defined in `proto/marga.proto`; the types are
/// mirrored here with prost derives so the build does not depend on a
/// system protoc.
pub mod proto {
    pub mod marga {
        /// Requests sent from the navigator to the robot bridge.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Request {
            #[prost(oneof = "request::Request", tags = "1, 2, 3, 4")]
            pub request: Option<request::Request>,
        }

        pub mod request {
            #[derive(Clone, PartialEq, prost::Oneof)]
            pub enum Request {
                #[prost(message, tag = "1")]
                ReadAll(super::ReadAll),
                #[prost(message, tag = "2")]
                ReadSonar(super::ReadSonar),
                #[prost(message, tag = "3")]
                SetSpeed(super::SetSpeed),
                #[prost(message, tag = "4")]
                SetOdometry(super::SetOdometry),
            }
        }

        /// Block until the next sensor tick and return the robot state.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct ReadAll {}

        /// Return the most recent sonar frame.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct ReadSonar {}

        /// Velocity command: translational and angular speed.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct SetSpeed {
            /// m/s
            #[prost(float, tag = "1")]
            pub linear: f32,
            /// rad/s
            #[prost(float, tag = "2")]
            pub angular: f32,
        }

        /// Overwrite the robot's odometric pose.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct SetOdometry {
            #[prost(float, tag = "1")]
            pub x: f32,
            #[prost(float, tag = "2")]
            pub y: f32,
            #[prost(float, tag = "3")]
            pub theta: f32,
        }

        /// Replies from the bridge.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Reply {
            #[prost(oneof = "reply::Reply", tags = "1, 2, 3")]
            pub reply: Option<reply::Reply>,
        }

        pub mod reply {
            #[derive(Clone, PartialEq, prost::Oneof)]
            pub enum Reply {
                #[prost(message, tag = "1")]
                State(super::State),
                #[prost(message, tag = "2")]
                Sonar(super::Sonar),
                #[prost(message, tag = "3")]
                Ack(super::Ack),
            }
        }

        #[derive(Clone, PartialEq, prost::Message)]
        pub struct State {
            #[prost(float, tag = "1")]
            pub x: f32,
            #[prost(float, tag = "2")]
            pub y: f32,
            #[prost(float, tag = "3")]
            pub theta: f32,
            #[prost(bool, tag = "4")]
            pub stall: bool,
        }

        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Sonar {
            /// Eight ranges in meters, index 0 leftmost (+90 deg).
            #[prost(float, repeated, tag = "1")]
            pub ranges: Vec<f32>,
            /// False while the sonar array is still warming up.
            #[prost(bool, tag = "2")]
            pub ready: bool,
        }

        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Ack {}
    }
}

use proto::marga;

/// Number of forward-facing sonar rangefinders.
pub const SONAR_COUNT: usize = 8;

/// One robot state reading: odometric pose plus the stall flag.
#[derive(Clone, Copy, Debug)]
pub struct StateReading {
    pub pose: Pose2D,
    pub stall: bool,
}

/// One sonar frame. `ready` is false while the array is still warming up
/// and the ranges are stale.
#[derive(Clone, Copy, Debug)]
pub struct SonarReading {
    pub ranges: [f32; SONAR_COUNT],
    pub ready: bool,
}

/// The consumed robot interface.
///
/// `read_all` blocks on the bridge until the next sensor tick; the other
/// calls are request/reply. Implementations must tolerate `read_sonar`
/// being called at a much lower rate than `read_all`.
pub trait RobotLink: Send {
    fn read_all(&mut self) -> Result<StateReading>;
    fn read_sonar(&mut self) -> Result<SonarReading>;
    fn set_speed(&mut self, linear: f32, angular: f32) -> Result<()>;
    fn set_odometry(&mut self, x: f32, y: f32, theta: f32) -> Result<()>;
}

/// Default receive buffer size (64KB)
const DEFAULT_BUFFER_SIZE: usize = 65536;

/// TCP client for the robot bridge daemon.
pub struct BridgeClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl BridgeClient {
    /// Connect with timeout. The address may use a hostname.
    pub fn connect_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        let sock_addr = addr
            .to_socket_addrs()
            .map_err(|e| MargaError::Config(format!("Invalid address {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| MargaError::Config(format!("Address {} did not resolve", addr)))?;
        let stream = TcpStream::connect_timeout(&sock_addr, timeout)?;
        stream.set_nodelay(true)?;

        tracing::info!("Connected to robot bridge at {}", addr);

        Ok(Self {
            stream,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
        })
    }

    /// Send a request and read back one reply frame.
    fn roundtrip(&mut self, request: marga::Request) -> Result<marga::Reply> {
        let encoded = request.encode_to_vec();
        let len = encoded.len() as u32;

        // Write length prefix (big-endian), then payload
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(&encoded)?;
        self.stream.flush()?;

        // Read length prefix
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf)?;
        let msg_len = u32::from_be_bytes(len_buf) as usize;
        if msg_len > self.buffer.len() {
            return Err(MargaError::Protocol(format!(
                "Reply frame too large: {} bytes",
                msg_len
            )));
        }

        // Read payload and decode
        self.stream.read_exact(&mut self.buffer[..msg_len])?;
        let reply = marga::Reply::decode(&self.buffer[..msg_len])?;
        Ok(reply)
    }
}

impl RobotLink for BridgeClient {
    fn read_all(&mut self) -> Result<StateReading> {
        let request = marga::Request {
            request: Some(marga::request::Request::ReadAll(marga::ReadAll {})),
        };
        match self.roundtrip(request)?.reply {
            Some(marga::reply::Reply::State(state)) => Ok(StateReading {
                pose: Pose2D::new(state.x, state.y, state.theta),
                stall: state.stall,
            }),
            other => Err(MargaError::Protocol(format!(
                "Expected state reply, got {:?}",
                other
            ))),
        }
    }

    fn read_sonar(&mut self) -> Result<SonarReading> {
        let request = marga::Request {
            request: Some(marga::request::Request::ReadSonar(marga::ReadSonar {})),
        };
        match self.roundtrip(request)?.reply {
            Some(marga::reply::Reply::Sonar(sonar)) => {
                if sonar.ranges.len() != SONAR_COUNT {
                    return Err(MargaError::Protocol(format!(
                        "Expected {} sonar ranges, got {}",
                        SONAR_COUNT,
                        sonar.ranges.len()
                    )));
                }
                let mut ranges = [0.0f32; SONAR_COUNT];
                ranges.copy_from_slice(&sonar.ranges);
                Ok(SonarReading {
                    ranges,
                    ready: sonar.ready,
                })
            }
            other => Err(MargaError::Protocol(format!(
                "Expected sonar reply, got {:?}",
                other
            ))),
        }
    }

    fn set_speed(&mut self, linear: f32, angular: f32) -> Result<()> {
        let request = marga::Request {
            request: Some(marga::request::Request::SetSpeed(marga::SetSpeed {
                linear,
                angular,
            })),
        };
        match self.roundtrip(request)?.reply {
            Some(marga::reply::Reply::Ack(_)) => Ok(()),
            other => Err(MargaError::Protocol(format!(
                "Expected ack for speed command, got {:?}",
                other
            ))),
        }
    }

    fn set_odometry(&mut self, x: f32, y: f32, theta: f32) -> Result<()> {
        let request = marga::Request {
            request: Some(marga::request::Request::SetOdometry(marga::SetOdometry {
                x,
                y,
                theta,
            })),
        };
        match self.roundtrip(request)?.reply {
            Some(marga::reply::Reply::Ack(_)) => Ok(()),
            other => Err(MargaError::Protocol(format!(
                "Expected ack for odometry command, got {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted robot used to drive the stack in tests.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug)]
    pub struct MockState {
        pub pose: Pose2D,
        pub stall: bool,
        pub ranges: [f32; SONAR_COUNT],
        pub sonar_ready: bool,
        pub read_alls: usize,
        pub sonar_polls: usize,
        pub speed_log: Vec<(f32, f32)>,
        /// When true, each read_all integrates the last velocity command
        /// over `dt`, turning the mock into a tiny kinematic simulator.
        pub simulate: bool,
        pub dt: f32,
        pub last_cmd: (f32, f32),
    }

    impl Default for MockState {
        fn default() -> Self {
            Self {
                pose: Pose2D::default(),
                stall: false,
                ranges: [5.0; SONAR_COUNT],
                sonar_ready: true,
                read_alls: 0,
                sonar_polls: 0,
                speed_log: Vec::new(),
                simulate: false,
                dt: 0.05,
                last_cmd: (0.0, 0.0),
            }
        }
    }

    /// Robot link over shared mutable state; tests hold the same handle
    /// and mutate pose/sonar while the sensor thread runs.
    pub struct MockRobot {
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockRobot {
        pub fn new() -> (Self, Arc<Mutex<MockState>>) {
            let state = Arc::new(Mutex::new(MockState::default()));
            (
                Self {
                    state: Arc::clone(&state),
                },
                state,
            )
        }
    }

    impl RobotLink for MockRobot {
        fn read_all(&mut self) -> Result<StateReading> {
            // Emulate the blocking sensor tick.
            std::thread::sleep(Duration::from_millis(1));
            let mut state = self.state.lock().unwrap();
            state.read_alls += 1;
            if state.simulate {
                let (linear, angular) = state.last_cmd;
                let dt = state.dt;
                let pose = state.pose;
                state.pose = Pose2D::new(
                    pose.x + linear * pose.theta.cos() * dt,
                    pose.y + linear * pose.theta.sin() * dt,
                    pose.theta + angular * dt,
                );
            }
            Ok(StateReading {
                pose: state.pose,
                stall: state.stall,
            })
        }

        fn read_sonar(&mut self) -> Result<SonarReading> {
            let mut state = self.state.lock().unwrap();
            state.sonar_polls += 1;
            Ok(SonarReading {
                ranges: state.ranges,
                ready: state.sonar_ready,
            })
        }

        fn set_speed(&mut self, linear: f32, angular: f32) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.speed_log.push((linear, angular));
            state.last_cmd = (linear, angular);
            Ok(())
        }

        fn set_odometry(&mut self, x: f32, y: f32, theta: f32) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.pose = Pose2D::new(x, y, theta);
            Ok(())
        }
    }
}
