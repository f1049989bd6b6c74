//! Lexical scope tracking.
//!
//! Scopes form a chain from the global scope through a function scope to
//! nested block scopes, modelled as a frame stack. Variable lookups chase
//! the chain outward; declarations land in the innermost frame. Functions
//! may only be defined at the global level.

use indexmap::{IndexMap, IndexSet};

use rill_foundation::{
    Alloc, DefKind, ForeignRegistry, FunctionType, IntrinsicFunction, PrimKind, Settings, Type,
    UserError, UserResult, Var,
};
use rill_foundation::var::{
    ALIAS_VAR_PREFIX, FILENAME_OF_PREFIX, LOCAL_VALUE_VAR_PREFIX, STRUCT_FIELD_VAR_PREFIX,
    TMP_VAR_PREFIX,
};

/// Properties attached to declared functions, driving call lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FnProp {
    Builtin,
    WrappedBuiltin,
    App,
    Composite,
    Sync,
    Control,
    Parallel,
    Targetable,
    Deprecated,
    Checkpointed,
}

/// Per-function state: the name, the counter pool used to mint unique
/// names, and every variable name the function has seen. Names must be
/// unique across the whole function, not just the live scope chain, so
/// minting consults the used set as well as the visible scopes.
#[derive(Debug)]
pub struct FunctionContext {
    name: String,
    counters: IndexMap<String, u64>,
    used_names: IndexSet<String>,
}

impl FunctionContext {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: IndexMap::new(),
            used_names: IndexSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next value of a named counter, starting at 1.
    pub fn counter_val(&mut self, counter: &str) -> u64 {
        let entry = self.counters.entry(counter.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// A unique construct name within this function.
    pub fn construct_name(&mut self, prefix: &str) -> String {
        let n = self.counter_val(prefix);
        format!("{}-{}{}", self.name, prefix, n)
    }

    fn is_used(&self, name: &str) -> bool {
        self.used_names.contains(name)
    }

    fn mark_used(&mut self, name: &str) {
        self.used_names.insert(name.to_string());
    }
}

#[derive(Debug, Default)]
struct Frame {
    vars: IndexMap<String, Var>,
    types: IndexMap<String, Type>,
}

#[derive(Debug)]
struct FunctionInfo {
    ty: FunctionType,
    props: IndexSet<FnProp>,
}

/// The scope chain plus the registries threaded through lowering.
pub struct Context {
    frames: Vec<Frame>,
    /// Parallel to `frames`: the function context opened by that frame.
    function_frames: Vec<Option<FunctionContext>>,
    functions: IndexMap<String, FunctionInfo>,
    intrinsics: IndexMap<String, IntrinsicFunction>,
    settings: Settings,
    foreign: ForeignRegistry,
    line: u32,
}

impl Context {
    pub fn new(settings: Settings, foreign: ForeignRegistry) -> Self {
        Self {
            frames: vec![Frame::default()],
            function_frames: vec![None],
            functions: IndexMap::new(),
            intrinsics: IndexMap::new(),
            settings,
            foreign,
            line: 0,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn foreign(&self) -> &ForeignRegistry {
        &self.foreign
    }

    pub fn foreign_mut(&mut self) -> &mut ForeignRegistry {
        &mut self.foreign
    }

    // --- line tracking ---

    pub fn sync_line(&mut self, line: u32) {
        if line != 0 {
            self.line = line;
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn file_line(&self) -> String {
        format!("line {}", self.line)
    }

    // --- scope management ---

    pub fn enter_function(&mut self, name: &str) {
        self.frames.push(Frame::default());
        self.function_frames.push(Some(FunctionContext::new(name)));
    }

    pub fn enter_block(&mut self) {
        self.frames.push(Frame::default());
        self.function_frames.push(None);
    }

    pub fn exit_scope(&mut self) {
        assert!(self.frames.len() > 1, "cannot exit the global scope");
        self.frames.pop();
        self.function_frames.pop();
    }

    fn in_global_scope(&self) -> bool {
        self.frames.len() == 1
    }

    /// The counter pool of the enclosing function.
    pub fn function_context(&mut self) -> &mut FunctionContext {
        self.function_frames
            .iter_mut()
            .rev()
            .flatten()
            .next()
            .expect("no enclosing function context")
    }

    fn try_function_context_mut(&mut self) -> Option<&mut FunctionContext> {
        self.function_frames.iter_mut().rev().flatten().next()
    }

    /// A name is free when no enclosing scope declares it and the function
    /// has never minted or declared it, even in a closed sibling scope.
    fn name_free(&self, name: &str) -> bool {
        if self.lookup_def(name).is_some() {
            return false;
        }
        !self
            .function_frames
            .iter()
            .rev()
            .flatten()
            .next()
            .map(|fc| fc.is_used(name))
            .unwrap_or(false)
    }

    /// A unique construct name in the enclosing function.
    pub fn construct_name(&mut self, prefix: &str) -> String {
        self.function_context().construct_name(prefix)
    }

    // --- variables ---

    pub fn lookup_var(&self, name: &str) -> Option<&Var> {
        self.frames.iter().rev().find_map(|f| f.vars.get(name))
    }

    /// Lookup that reports an undefined variable as a user error.
    pub fn lookup_var_user(&self, name: &str) -> UserResult<Var> {
        self.lookup_var(name).cloned().ok_or_else(|| {
            UserError::UndefinedVariable(format!("{}: {}", self.file_line(), name))
        })
    }

    /// Any declaration of the name, in any enclosing scope.
    pub fn lookup_def(&self, name: &str) -> Option<&Var> {
        self.lookup_var(name)
    }

    pub fn declare_variable(&mut self, var: Var) -> UserResult<Var> {
        let frame = self.frames.last_mut().expect("no frame");
        if frame.vars.contains_key(var.name()) {
            return Err(UserError::DoubleDefine(format!(
                "{}: variable {} already defined in this scope",
                self.file_line(),
                var.name()
            )));
        }
        frame.vars.insert(var.name().to_string(), var.clone());
        if let Some(fc) = self.try_function_context_mut() {
            fc.mark_used(var.name());
        }
        Ok(var)
    }

    /// All variables visible from the current scope, outermost first.
    pub fn visible_variables(&self) -> Vec<Var> {
        self.frames
            .iter()
            .flat_map(|f| f.vars.values().cloned())
            .collect()
    }

    // --- types ---

    pub fn declare_type(&mut self, name: &str, ty: Type) -> UserResult<()> {
        let frame = self.frames.last_mut().expect("no frame");
        if frame.types.contains_key(name) {
            return Err(UserError::DoubleDefine(format!(
                "{}: type {} already defined",
                self.file_line(),
                name
            )));
        }
        frame.types.insert(name.to_string(), ty);
        Ok(())
    }

    pub fn lookup_type(&self, name: &str) -> Option<&Type> {
        self.frames.iter().rev().find_map(|f| f.types.get(name))
    }

    pub fn lookup_type_user(&self, name: &str) -> UserResult<Type> {
        self.lookup_type(name)
            .cloned()
            .ok_or_else(|| UserError::UndefinedType(format!("{}: {}", self.file_line(), name)))
    }

    // --- functions ---

    pub fn define_function(&mut self, name: &str, ty: FunctionType) -> UserResult<()> {
        assert!(
            self.in_global_scope(),
            "cannot define function {} in a local context",
            name
        );
        if self.functions.contains_key(name) {
            return Err(UserError::DoubleDefine(format!(
                "{}: function {} already defined",
                self.file_line(),
                name
            )));
        }
        self.functions.insert(
            name.to_string(),
            FunctionInfo {
                ty,
                props: IndexSet::new(),
            },
        );
        Ok(())
    }

    pub fn set_function_prop(&mut self, name: &str, prop: FnProp) {
        assert!(
            self.in_global_scope(),
            "cannot set function property in a local context"
        );
        self.functions
            .get_mut(name)
            .unwrap_or_else(|| panic!("property set on undefined function {}", name))
            .props
            .insert(prop);
    }

    pub fn lookup_function(&self, name: &str) -> Option<&FunctionType> {
        self.functions.get(name).map(|info| &info.ty)
    }

    pub fn lookup_function_user(&self, name: &str) -> UserResult<FunctionType> {
        self.lookup_function(name)
            .cloned()
            .ok_or_else(|| UserError::UndefinedFunction(format!("{}: {}", self.file_line(), name)))
    }

    pub fn has_function_prop(&self, name: &str, prop: FnProp) -> bool {
        self.functions
            .get(name)
            .map(|info| info.props.contains(&prop))
            .unwrap_or(false)
    }

    pub fn function_props(&self, name: &str) -> Vec<FnProp> {
        self.functions
            .get(name)
            .map(|info| info.props.iter().copied().collect())
            .unwrap_or_default()
    }

    // --- intrinsics ---

    pub fn define_intrinsic(&mut self, name: &str, intrinsic: IntrinsicFunction) {
        assert!(self.in_global_scope());
        self.intrinsics.insert(name.to_string(), intrinsic);
    }

    pub fn is_intrinsic(&self, name: &str) -> bool {
        self.intrinsics.contains_key(name)
    }

    pub fn lookup_intrinsic(&self, name: &str) -> Option<IntrinsicFunction> {
        self.intrinsics.get(name).copied()
    }

    // --- compiler variable creation ---

    /// A fresh temporary future variable.
    pub fn create_tmp_var(&mut self, ty: Type, store_in_stack: bool) -> UserResult<Var> {
        let name = self.mint_counted_name(TMP_VAR_PREFIX, "intermediate_var");
        let alloc = if store_in_stack { Alloc::Stack } else { Alloc::Temp };
        self.declare_variable(Var::new(name, ty, alloc, DefKind::LocalCompiler))
    }

    /// A fresh alias variable, a handle to storage owned elsewhere.
    pub fn create_alias_var(&mut self, ty: Type) -> UserResult<Var> {
        let name = self.mint_counted_name(ALIAS_VAR_PREFIX, "alias_var");
        self.declare_variable(Var::new(name, ty, Alloc::Alias, DefKind::LocalCompiler))
    }

    /// A fresh local value variable. When a source variable name is given,
    /// work it into the generated name.
    pub fn create_local_value_var(
        &mut self,
        ty: Type,
        preferred_suffix: Option<&str>,
    ) -> UserResult<Var> {
        let name = self.choose_name(LOCAL_VALUE_VAR_PREFIX, preferred_suffix, "value_var");
        self.declare_variable(Var::new(name, ty, Alloc::Local, DefKind::LocalCompiler))
    }

    /// The local value variable for a future's contents.
    pub fn create_value_of_var(&mut self, future: &Var) -> UserResult<Var> {
        let ty = future.ty().value_of_future();
        self.create_local_value_var(ty, Some(future.name()))
    }

    /// An alias for a struct field, named after the root struct and path.
    pub fn create_struct_field_var(
        &mut self,
        root: &Var,
        field_path: &[String],
        ty: Type,
        alloc: Alloc,
    ) -> Var {
        let base = format!(
            "{}{}_{}",
            STRUCT_FIELD_VAR_PREFIX,
            root.name(),
            field_path.join("_")
        );
        let mut name = base.clone();
        let mut counter = 1;
        while !self.name_free(&name) {
            name = format!("{}-{}", base, counter);
            counter += 1;
        }
        self.declare_variable(Var::new(name, ty, alloc, DefKind::LocalCompiler))
            .expect("minted struct field name collided")
    }

    /// An alias for the filename future of a file variable.
    pub fn create_filename_alias_var(&mut self, file_var_name: &str) -> Var {
        let name = self.choose_name(FILENAME_OF_PREFIX, Some(file_var_name), "filename_of");
        self.declare_variable(Var::new(
            name,
            Type::future(PrimKind::Str),
            Alloc::Alias,
            DefKind::LocalCompiler,
        ))
        .expect("minted filename alias collided")
    }

    fn mint_counted_name(&mut self, prefix: &str, counter: &str) -> String {
        loop {
            let n = self.function_context().counter_val(counter);
            let name = format!("{}{}", prefix, n);
            if self.name_free(&name) {
                return name;
            }
        }
    }

    fn choose_name(&mut self, prefix: &str, preferred_suffix: Option<&str>, counter: &str) -> String {
        if let Some(suffix) = preferred_suffix {
            let nice = format!("{}{}", prefix, suffix);
            if self.name_free(&nice) {
                return nice;
            }
        }
        let base = preferred_suffix
            .map(|s| format!("{}{}", prefix, s))
            .unwrap_or_else(|| prefix.to_string());
        loop {
            let n = self.function_context().counter_val(counter);
            let name = format!("{}{}", base, n);
            if self.name_free(&name) {
                return name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(Settings::new(), ForeignRegistry::new())
    }

    #[test]
    fn lookup_chases_parent_scopes() {
        let mut ctx = ctx();
        ctx.enter_function("f");
        let outer = ctx
            .declare_variable(Var::new(
                "x",
                Type::future(PrimKind::Int),
                Alloc::Stack,
                DefKind::LocalUser,
            ))
            .unwrap();
        ctx.enter_block();
        assert_eq!(ctx.lookup_var("x"), Some(&outer));
        ctx.exit_scope();
        ctx.exit_scope();
        assert!(ctx.lookup_var("x").is_none());
    }

    #[test]
    fn double_define_in_same_scope_fails() {
        let mut ctx = ctx();
        ctx.enter_function("f");
        let var = Var::new(
            "x",
            Type::future(PrimKind::Int),
            Alloc::Stack,
            DefKind::LocalUser,
        );
        ctx.declare_variable(var.clone()).unwrap();
        assert!(matches!(
            ctx.declare_variable(var),
            Err(UserError::DoubleDefine(_))
        ));
    }

    #[test]
    fn shadowing_in_inner_scope_is_allowed() {
        let mut ctx = ctx();
        ctx.enter_function("f");
        ctx.declare_variable(Var::new(
            "x",
            Type::future(PrimKind::Int),
            Alloc::Stack,
            DefKind::LocalUser,
        ))
        .unwrap();
        ctx.enter_block();
        assert!(ctx
            .declare_variable(Var::new(
                "x",
                Type::future(PrimKind::Float),
                Alloc::Stack,
                DefKind::LocalUser,
            ))
            .is_ok());
    }

    #[test]
    fn tmp_names_are_unique_within_a_function() {
        let mut ctx = ctx();
        ctx.enter_function("f");
        let a = ctx.create_tmp_var(Type::future(PrimKind::Int), false).unwrap();
        let b = ctx.create_tmp_var(Type::future(PrimKind::Int), false).unwrap();
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("tmp"));
    }

    #[test]
    #[should_panic(expected = "cannot define function")]
    fn function_definition_in_local_context_panics() {
        let mut ctx = ctx();
        ctx.enter_function("f");
        let _ = ctx.define_function("g", FunctionType::new(vec![], vec![]));
    }

    #[test]
    fn struct_field_names_dedup() {
        let mut ctx = ctx();
        ctx.enter_function("f");
        let root = Var::new(
            "s",
            Type::Struct(rill_foundation::StructType::new("t", vec![])),
            Alloc::Stack,
            DefKind::LocalUser,
        );
        let path = vec!["inner".to_string(), "field".to_string()];
        let a = ctx.create_struct_field_var(
            &root,
            &path,
            Type::future(PrimKind::Int),
            Alloc::Alias,
        );
        let b = ctx.create_struct_field_var(
            &root,
            &path,
            Type::future(PrimKind::Int),
            Alloc::Alias,
        );
        assert_eq!(a.name(), "f_s_inner_field");
        assert_eq!(b.name(), "f_s_inner_field-1");
    }
}
