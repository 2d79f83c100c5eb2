use thiserror::Error;

use crate::{
    metadata::{
        token::Token,
        entity::{EntityId, ModuleIndex},
    },
    nodes::NodeKey,
};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant except [`Error::BackendFailure`] is fatal to a compilation session: an image
/// is all-or-nothing, so the first fatal condition aborts the run and no partial output is
/// produced. Cancellation is not an error and is reported through
/// [`crate::compilation::EmitOutcome::Cancelled`] instead.
///
/// # Error Categories
///
/// ## Configuration
/// - [`Error::Configuration`] - Invalid optimization mode, missing backend, bad pool size
/// - [`Error::ModuleNotFound`] - The input path does not name a known module
///
/// ## Resolution
/// - [`Error::UnresolvableReference`] - An entity outside the compilation group has no import
/// - [`Error::EntityNotFound`] - The entity model has no record of an entity
/// - [`Error::InvalidToken`] - A module-local token cannot be mapped to an entity
///
/// ## Code Generation
/// - [`Error::Codegen`] - The backend rejected a method body
/// - [`Error::BackendFailure`] - Raised by backends, converted into [`Error::Codegen`]
///
/// ## Pipeline
/// - [`Error::GraphError`] - Dependency graph or emission invariant violation
/// - [`Error::SessionConsumed`] - `emit` was called twice on one session
/// - [`Error::Malformed`] - An encoding could not be produced
///
/// # Examples
///
/// ```rust,no_run
/// use aotgraph::{compilation::EmitOutcome, Error};
///
/// fn report(result: aotgraph::Result<EmitOutcome>) {
///     match result {
///         Ok(EmitOutcome::Completed(output)) => println!("{} nodes", output.nodes.len()),
///         Ok(EmitOutcome::Cancelled) => println!("cancelled"),
///         Err(Error::Codegen { method, diagnostic }) => eprintln!("{method}: {diagnostic}"),
///         Err(e) => eprintln!("{e}"),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The session configuration is invalid.
    ///
    /// Raised for unknown optimization mode names, a missing codegen backend, a zero-sized
    /// worker pool or roots that fall outside the compilation group. Malformed backend option
    /// strings are *not* configuration errors; they are dropped silently.
    #[error("Invalid configuration - {0}")]
    Configuration(String),

    /// No module with the given path or name is known to the entity model.
    #[error("Module not found - {0}")]
    ModuleNotFound(String),

    /// An entity cannot be tokenized.
    ///
    /// The entity belongs to a module outside the compilation group and the requesting module
    /// carries no reference row through which an import cell could be bound at load time.
    ///
    /// # Fields
    ///
    /// * `entity` - The entity that could not be tokenized
    /// * `from` - The module the resolution was performed from
    /// * `requester` - The graph node that asked for the reference, when known
    #[error(
        "Unresolvable reference to {entity} from module {from}{}",
        .requester.as_ref().map(|r| format!(" (requested by {r})")).unwrap_or_default()
    )]
    UnresolvableReference {
        /// The entity that could not be tokenized
        entity: EntityId,
        /// The module the reference was resolved from
        from: ModuleIndex,
        /// The node which requested the reference
        requester: Option<NodeKey>,
    },

    /// The code generation backend failed on a method body.
    ///
    /// These failures indicate a verification or IL-shape defect rather than a transient
    /// condition, so they are never retried.
    #[error("Code generation failed for {method} - {diagnostic}")]
    Codegen {
        /// The method whose body could not be compiled
        method: EntityId,
        /// The diagnostic payload reported by the backend
        diagnostic: String,
    },

    /// Failure descriptor returned by a backend.
    ///
    /// Backends do not know which session node they are compiling for; the codegen driver
    /// converts this variant into [`Error::Codegen`] with the method identity attached.
    #[error("Backend failure - {0}")]
    BackendFailure(String),

    /// The entity model has no record of the requested entity.
    #[error("Entity not found - {0}")]
    EntityNotFound(EntityId),

    /// A module-local metadata token cannot be mapped to an entity.
    #[error("Invalid token - {0}")]
    InvalidToken(Token),

    /// Dependency graph error.
    ///
    /// Covers invariant violations detected by the graph engine or during emission, such as a
    /// relocation that targets a node which was never marked.
    #[error("{0}")]
    GraphError(String),

    /// The session was already emitted.
    ///
    /// A compilation session is single-use; calling `emit` a second time is a usage error.
    #[error("Compilation session has already been emitted")]
    SessionConsumed,

    /// An encoding could not be produced.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },
}

impl Error {
    /// Attaches the requesting node to an [`Error::UnresolvableReference`].
    ///
    /// Other variants, and references which already name a requester, are returned unchanged.
    #[must_use]
    pub fn with_requester(self, node: &NodeKey) -> Self {
        match self {
            Error::UnresolvableReference {
                entity,
                from,
                requester: None,
            } => Error::UnresolvableReference {
                entity,
                from,
                requester: Some(node.clone()),
            },
            other => other,
        }
    }
}
