//! Composable handle construction.
//!
//! A freshly opened [`Handle`] is configured by an ordered list of steps.
//! Order is the caller's: options usually go before `bind`, and `bind`
//! before `listen`. The first failing step aborts the build and its error is
//! returned; earlier steps are not rolled back.
//!
//! ```no_run
//! use socketry::socket::{create_handle, with_bind, with_listen, with_reuse, Address, Kind};
//!
//! let listener = create_handle(
//!     Kind::Stream,
//!     [
//!         with_reuse(true, false),
//!         with_bind(Address::localhost(9000)),
//!         with_listen(64),
//!     ],
//! )?;
//! # Ok::<(), socketry::Error>(())
//! ```

use crate::error::Result;
use crate::socket::addr::Address;
use crate::socket::handle::{Handle, Kind};
use crate::socket::option::{RecvTimeout, ReuseAddr, ReusePort, SendTimeout, SockOpt};
use std::fmt;
use tracing::debug;

/// One unit of deferred configuration applied to an open handle.
pub trait Step {
    fn apply(&self, handle: &mut Handle) -> Result<()>;
}

impl<F> Step for F
where
    F: Fn(&mut Handle) -> Result<()>,
{
    fn apply(&self, handle: &mut Handle) -> Result<()> {
        self(handle)
    }
}

/// Type-erased step, as returned by the `with_*` factories.
pub type BoxedStep = Box<dyn Fn(&mut Handle) -> Result<()> + Send + Sync>;

/// Open a handle of `kind` and apply `steps` to it in order.
pub fn create_handle<I>(kind: Kind, steps: I) -> Result<Handle>
where
    I: IntoIterator,
    I::Item: Step,
{
    let mut handle = Handle::open(kind)?;
    let mut applied = 0usize;
    for step in steps {
        step.apply(&mut handle)?;
        applied += 1;
    }
    debug!(?kind, steps = applied, "handle configured");
    Ok(handle)
}

/// A reusable list of steps, for building several identically configured
/// handles.
pub struct HandleBuilder {
    kind: Kind,
    steps: Vec<Box<dyn Step + Send + Sync>>,
}

impl HandleBuilder {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            steps: Vec::new(),
        }
    }

    /// Append a step; steps run in the order they were added.
    pub fn step<S>(mut self, step: S) -> Self
    where
        S: Step + Send + Sync + 'static,
    {
        self.steps.push(Box::new(step));
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Open a new handle and run every step against it.
    pub fn build(&self) -> Result<Handle> {
        let mut handle = Handle::open(self.kind)?;
        for step in &self.steps {
            step.apply(&mut handle)?;
        }
        debug!(kind = ?self.kind, steps = self.steps.len(), "handle configured");
        Ok(handle)
    }
}

impl fmt::Debug for HandleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleBuilder")
            .field("kind", &self.kind)
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Set `SO_REUSEADDR` and `SO_REUSEPORT`, each from its own flag.
pub fn with_reuse(reuse_addr: bool, reuse_port: bool) -> BoxedStep {
    Box::new(move |handle: &mut Handle| {
        handle.set_opt(&ReuseAddr::new(reuse_addr))?;
        handle.set_opt(&ReusePort::new(reuse_port))
    })
}

/// Bind to a local address.
pub fn with_bind(addr: Address) -> BoxedStep {
    Box::new(move |handle: &mut Handle| handle.bind(&addr))
}

/// Listen with the given backlog.
pub fn with_listen(backlog: i32) -> BoxedStep {
    Box::new(move |handle: &mut Handle| handle.listen(backlog))
}

/// Set receive/send timeouts in seconds. A non-positive value leaves that
/// timeout unset.
pub fn with_timeouts(rcv_secs: i64, snd_secs: i64) -> BoxedStep {
    Box::new(move |handle: &mut Handle| {
        if rcv_secs > 0 {
            handle.set_opt(&RecvTimeout::from_secs(rcv_secs as u64))?;
        }
        if snd_secs > 0 {
            handle.set_opt(&SendTimeout::from_secs(snd_secs as u64))?;
        }
        Ok(())
    })
}

/// Apply a single option object.
pub fn with_opt<O>(opt: O) -> BoxedStep
where
    O: SockOpt + Send + Sync + 'static,
{
    Box::new(move |handle: &mut Handle| handle.set_opt(&opt))
}
