//! Prompt rendering for the planner, executor and debugger.

use minijinja::{Environment, context};

use crate::core::fix::{DebugFix, FixType};
use crate::task::Task;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const EXECUTE_TEMPLATE: &str = include_str!("prompts/execute.md");
const APPLY_FIX_TEMPLATE: &str = include_str!("prompts/apply_fix.md");
const DEBUG_TEMPLATE: &str = include_str!("prompts/debug.md");

/// Template engine wrapper around minijinja.
pub struct Prompts {
    env: Environment<'static>,
    /// Upper bound for each embedded tool output (plan, test log, execution log).
    output_budget_bytes: usize,
}

impl Prompts {
    pub fn new(output_budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("execute", EXECUTE_TEMPLATE)
            .expect("execute template should be valid");
        env.add_template("apply_fix", APPLY_FIX_TEMPLATE)
            .expect("apply_fix template should be valid");
        env.add_template("debug", DEBUG_TEMPLATE)
            .expect("debug template should be valid");
        Self {
            env,
            output_budget_bytes,
        }
    }

    pub fn plan(&self, task: &Task) -> Result<String, minijinja::Error> {
        self.env.get_template("plan")?.render(context! {
            title => task.title.trim(),
            description => task.description.trim(),
        })
    }

    pub fn execute(&self, task: &Task, plan: &str) -> Result<String, minijinja::Error> {
        self.env.get_template("execute")?.render(context! {
            plan => self.clamp(plan),
            title => task.title.trim(),
            description => task.description.trim(),
        })
    }

    pub fn apply_fix(&self, fix: &DebugFix) -> Result<String, minijinja::Error> {
        self.env.get_template("apply_fix")?.render(context! {
            analysis => fix.analysis.trim(),
            fix_type => fix_type_label(fix.fix_type),
            fix_content => fix.fix_content.trim(),
        })
    }

    pub fn debug(
        &self,
        command: &str,
        failure_output: &str,
        execution_output: &str,
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("debug")?.render(context! {
            command => command,
            failure_output => self.clamp(failure_output),
            execution_output => Some(self.clamp(execution_output)).filter(|s| !s.is_empty()),
        })
    }

    fn clamp<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        keep_tail(text.trim(), self.output_budget_bytes)
    }
}

fn fix_type_label(fix_type: FixType) -> &'static str {
    match fix_type {
        FixType::CodePatch => "code_patch",
        FixType::Command => "command",
        FixType::ConfigChange => "config_change",
    }
}

/// Keep at most `budget` bytes from the end of `text`.
///
/// Build and test failures report the interesting part last, so the head is
/// what gets dropped.
pub fn keep_tail(text: &str, budget: usize) -> std::borrow::Cow<'_, str> {
    if text.len() <= budget {
        return std::borrow::Cow::Borrowed(text);
    }
    let mut start = text.len() - budget;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    std::borrow::Cow::Owned(format!(
        "[truncated {} bytes]\n{}",
        start,
        &text[start..]
    ))
}
