pub mod error;
pub mod package;
pub mod source;
pub mod stage;

// re-export the main types so consumers dont have to dig around
pub use error::{AuthFailure, Error, Result};
pub use package::{parse_listing, PackageRef, UpdateSource, Version};
pub use source::{
    Authenticator, CommandOutput, Notifier, PrivilegedOps, StageCallback, StageLauncher, Urgency,
};
pub use stage::{
    FailureCause, Invocation, OutputStream, ProcessErrorKind, Stage, StageEvent, StageResult,
};
