pub mod bus;
pub mod command;
pub mod composite;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod kernel;
pub mod message_queue;
pub mod session;
pub mod wire;

pub use bus::{EventBus, Subscription};
pub use command::{CommandBody, KernelCommand};
pub use composite::CompositeKernel;
pub use config::{BusyPolicy, SessionConfig};
pub use error::{InvalidArgument, KernelError, SubmitError};
pub use event::{EventBody, KernelEvent};
pub use id::CommandId;
pub use kernel::{Kernel, KernelContext};
pub use session::{launch, launch_with_formatter, CommandState, SessionHandle};
