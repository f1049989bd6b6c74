//! External process execution.

use std::fmt;

use indexmap::IndexMap;

use rill_foundation::{Arg, Redirects, Var};

use super::{
    output_positions_renamed, replace_args, replace_vars, Instruction, Opcode, RenameMode,
};
use crate::opt::computed::{ComputedValue, ResultVal};

/// Spawn an external process. Inputs are argv tokens, redirect filenames,
/// and input-file arguments; outputs are the produced files, closed once
/// the process returns.
#[derive(Debug, Clone)]
pub struct RunExternal {
    cmd: String,
    in_files: Vec<Arg>,
    out_files: Vec<Var>,
    args: Vec<Arg>,
    redirects: Redirects,
    has_side_effects: bool,
    deterministic: bool,
}

impl RunExternal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cmd: impl Into<String>,
        in_files: Vec<Arg>,
        out_files: Vec<Var>,
        args: Vec<Arg>,
        redirects: Redirects,
        has_side_effects: bool,
        deterministic: bool,
    ) -> Instruction {
        Instruction::RunExternal(Self {
            cmd: cmd.into(),
            in_files,
            out_files,
            args,
            redirects,
            has_side_effects,
            deterministic,
        })
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn inputs(&self) -> Vec<Arg> {
        let mut all = self.args.clone();
        all.extend(self.in_files.iter().cloned());
        all.extend(self.redirects.redirections());
        all
    }

    pub fn outputs(&self) -> &[Var] {
        &self.out_files
    }

    pub fn has_side_effects(&self) -> bool {
        self.has_side_effects
    }

    /// Runs immediately, but the program must still order it after its
    /// input files.
    pub fn blocking_inputs(&self) -> Vec<Var> {
        self.in_files
            .iter()
            .filter_map(Arg::opt_var)
            .cloned()
            .collect()
    }

    pub fn replace_known_args(&mut self, known: &IndexMap<Var, Arg>) {
        replace_args(known, &mut self.args);
    }

    pub fn results(&self) -> Option<Vec<ResultVal>> {
        if !self.deterministic {
            return None;
        }
        let mut results = Vec::with_capacity(self.out_files.len());
        for (index, out) in self.out_files.iter().enumerate() {
            // Key includes command and argv; the output index distinguishes
            // multiple produced files.
            results.push(ResultVal::build(
                ComputedValue::new(
                    Opcode::RunExternal,
                    format!("{}:{}", self.cmd, index),
                    self.args.clone(),
                ),
                out.as_arg(),
                true,
            ));
        }
        Some(results)
    }

    pub fn rename_vars(&mut self, renames: &IndexMap<Var, Arg>, mode: RenameMode) {
        replace_args(renames, &mut self.args);
        replace_args(renames, &mut self.in_files);
        let mut redirs = [
            self.redirects.stdin.take(),
            self.redirects.stdout.take(),
            self.redirects.stderr.take(),
        ];
        for slot in redirs.iter_mut().flatten() {
            if let Arg::Var(v) = slot {
                if let Some(replacement) = renames.get(v) {
                    *slot = replacement.clone();
                }
            }
        }
        let [stdin, stdout, stderr] = redirs;
        self.redirects = Redirects {
            stdin,
            stdout,
            stderr,
        };
        if output_positions_renamed(mode) {
            replace_vars(renames, &mut self.out_files);
        }
    }
}

impl fmt::Display for RunExternal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outs: Vec<&str> = self.out_files.iter().map(Var::name).collect();
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        let ins: Vec<String> = self.in_files.iter().map(|a| a.to_string()).collect();
        write!(
            f,
            "run_external {} [ {} ] [ {} ] infiles=[{}]",
            self.cmd,
            outs.join(" "),
            args.join(" "),
            ins.join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_foundation::{Alloc, DefKind, PrimKind, Type};

    fn file_var(name: &str) -> Var {
        Var::new(
            name,
            Type::future(PrimKind::File),
            Alloc::Temp,
            DefKind::LocalCompiler,
        )
    }

    #[test]
    fn deterministic_commands_publish_results() {
        let out = file_var("out");
        let inst = RunExternal::new(
            "sort",
            vec![],
            vec![out.clone()],
            vec![Arg::string_lit("-u")],
            Redirects::default(),
            false,
            true,
        );
        let foreign = rill_foundation::ForeignRegistry::new();
        let settings = rill_foundation::Settings::new();
        let rvs = inst
            .results(&crate::opt::computed::EmptyCvMap, &foreign, &settings)
            .unwrap();
        assert_eq!(rvs.len(), 1);
        assert_eq!(rvs[0].location, out.as_arg());
        assert!(rvs[0].out_closed);
    }

    #[test]
    fn nondeterministic_commands_publish_nothing() {
        let inst = RunExternal::new(
            "mktemp",
            vec![],
            vec![file_var("out")],
            vec![],
            Redirects::default(),
            true,
            false,
        );
        let foreign = rill_foundation::ForeignRegistry::new();
        let settings = rill_foundation::Settings::new();
        assert!(inst
            .results(&crate::opt::computed::EmptyCvMap, &foreign, &settings)
            .is_none());
    }

    #[test]
    fn inputs_include_redirect_filenames() {
        let stdout_name = Arg::string_lit("log.txt");
        let inst = RunExternal::new(
            "echo",
            vec![],
            vec![],
            vec![Arg::string_lit("hi")],
            Redirects {
                stdout: Some(stdout_name.clone()),
                ..Redirects::default()
            },
            true,
            false,
        );
        assert!(inst.inputs().contains(&stdout_name));
    }
}
