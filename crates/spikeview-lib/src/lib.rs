pub mod backend;
pub mod config;
pub mod detectors;
pub mod error;
pub mod filter;
pub mod io;
pub mod labels;
pub mod mapping;
pub mod navigate;
pub mod registry;
pub mod session;
pub mod signal;
pub mod window;

pub use backend::{open_backend, ArrayBackend, BackendKind, Layout};
pub use config::{OrientationPolicy, ViewerConfig};
pub use error::{ErrorKind, ErrorReport, Result, SpikeError};
pub use filter::{FilterKind, FilterSpec};
pub use labels::{LabelSummary, SpikeLabelSet};
pub use navigate::{Direction, NavigationResult};
pub use registry::{DatasetDescriptor, DatasetRegistry, DatasetSummary};
pub use session::Session;
pub use signal::*;
pub use window::{ChannelWindow, DetectMode, DetectionInput, WindowOptions, WindowedSignalService};
