//! Socket primitives: addresses, buffer views, option objects, the owning
//! [`Handle`] and the step-based builder used to configure it.

mod addr;
mod buffer;
mod builder;
mod handle;
mod option;

pub use addr::{Address, DEFAULT_HOST};
pub use buffer::{ConstBuffer, MutableBuffer};
pub use builder::{
    create_handle, with_bind, with_listen, with_opt, with_reuse, with_timeouts, BoxedStep,
    HandleBuilder, Step,
};
pub use handle::{Handle, Kind, LISTEN_BACKLOG_DEFAULT};
pub use option::{
    Broadcast, BoolOpt, KeepAlive, RecvTimeout, ReuseAddr, ReusePort, SendTimeout, SockOpt,
    TcpNoDelay, TimeoutOpt,
};
