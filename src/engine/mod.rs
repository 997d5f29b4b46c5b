pub mod error;
pub mod executor;
pub mod gate;
pub mod graph;
pub mod guard;
pub mod observer;
pub mod state;
pub mod types;

pub use error::{EngineError, StateError};
pub use executor::{
    Engine, EngineSettings, ExecutionResponse, ResponseCode, StartOptions, StatusView,
    SuspendHandle,
};
pub use state::{StateDelta, StateRecord};
