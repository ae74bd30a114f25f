//! The stepwise agent loop.
//!
//! The agent follows a **Think → Decide → Act → Observe** cycle:
//!
//! 1. **Think**: ask the model for its next decision, streaming the
//!    reasoning to observers as it arrives
//! 2. **Decide**: decode the JSON decision envelope
//! 3. **Act**: run a tool, or record a plan or reflection
//! 4. **Observe**: feed the outcome back and think again
//!
//! The loop ends on a final answer, a fatal error, or when the thought budget
//! is spent. With no step kinds allowed, a request is answered directly
//! without the decision protocol.

pub mod accumulator;
pub mod directive;
pub mod dispatcher;
pub mod loop_runner;
pub mod prompt;
pub mod step;

#[cfg(test)]
mod test_helpers;

pub use accumulator::{AccumulatedMessage, accumulate};
pub use directive::{AgentDirective, Decision, DirectiveError, decode_directive};
pub use dispatcher::{DispatchError, ToolDispatcher};
pub use loop_runner::{AgentLoop, AgentRequest, AgentRun};
pub use prompt::build_system_prompt;
pub use step::{AgentStep, AgentStepKind, FnObserver, NoopObserver, StepEmitter, StepObserver};
