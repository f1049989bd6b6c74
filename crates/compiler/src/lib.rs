//! Rill Compiler
//!
//! Drives the middle end: a `Session` wires the expression walker to the
//! IR builder, validates the result, and reports diagnostics. Parsing and
//! target code generation live in other phases.

use rill_foundation::{
    ForeignRegistry, FunctionType, Settings, UserError, UserResult, Var,
};
use rill_frontend::ast::ExprTree;
use rill_frontend::walker::WrapperCache;
use rill_frontend::{Context, ExprWalker, FnProp};
use rill_ir::{MiddleEnd, Program, Validator};

/// A diagnostic from any phase of the middle end.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub line: Option<u32>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            severity: Severity::Error,
        }
    }

    fn from_user_error(err: UserError) -> Self {
        Self::error(err.to_string())
    }
}

/// One middle-end run: a context, a builder, and the walker state that
/// spans statements.
pub struct Session {
    ctx: Context,
    backend: MiddleEnd,
    wrappers: WrapperCache,
}

impl Session {
    /// A session over the default foreign-function registry.
    pub fn new(settings: Settings) -> Self {
        Self::with_registry(settings, ForeignRegistry::with_defaults())
    }

    pub fn with_registry(settings: Settings, foreign: ForeignRegistry) -> Self {
        Self {
            ctx: Context::new(settings, foreign.clone()),
            backend: MiddleEnd::new(foreign),
            wrappers: WrapperCache::new(),
        }
    }

    pub fn context(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Declare a callable function and its properties.
    pub fn define_function(
        &mut self,
        name: &str,
        ty: FunctionType,
        props: &[FnProp],
    ) -> UserResult<()> {
        self.ctx.define_function(name, ty)?;
        for prop in props {
            self.ctx.set_function_prop(name, *prop);
        }
        Ok(())
    }

    /// Open a function body for lowering. Arguments become visible in the
    /// new scope.
    pub fn start_function(
        &mut self,
        name: &str,
        inputs: Vec<Var>,
        outputs: Vec<Var>,
    ) -> UserResult<()> {
        self.ctx.enter_function(name);
        for arg in inputs.iter().chain(&outputs) {
            self.ctx.declare_variable(arg.clone())?;
        }
        self.backend.start_function(name, inputs, outputs);
        Ok(())
    }

    pub fn end_function(&mut self) {
        self.ctx.exit_scope();
        self.backend.end_function();
    }

    /// Declare a variable in the current scope and block.
    pub fn declare_var(&mut self, var: Var) -> UserResult<Var> {
        let var = self.ctx.declare_variable(var)?;
        use rill_foundation::CompilerBackend;
        self.backend.declare(&var);
        Ok(var)
    }

    /// Lower an expression into the given output variables.
    pub fn lower(&mut self, outs: &[Var], tree: &ExprTree) -> UserResult<()> {
        let mut walker =
            ExprWalker::with_wrappers(&mut self.backend, std::mem::take(&mut self.wrappers));
        let result = walker.eval_to_vars(&mut self.ctx, tree, outs, None);
        self.wrappers = walker.into_wrappers();
        result
    }

    /// Finish the run: validate and hand back the program.
    pub fn finish(self) -> Result<Program, Vec<Diagnostic>> {
        let program = self.backend.finish();
        Validator::standard().validate(&program);
        Ok(program)
    }
}

/// Lower a single-statement function body in a fresh session; the common
/// shape for tests and tools.
pub fn lower_statement(
    session: &mut Session,
    function: &str,
    outs: &[Var],
    tree: &ExprTree,
) -> Result<(), Diagnostic> {
    session
        .start_function(function, vec![], outs.to_vec())
        .map_err(Diagnostic::from_user_error)?;
    let result = session.lower(outs, tree);
    session.end_function();
    result.map_err(Diagnostic::from_user_error)
}
