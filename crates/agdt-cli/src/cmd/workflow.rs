use crate::cmd::Ctx;
use crate::output::print_json;
use agdt_core::{
    prompts::RenderedPrompt,
    workflow::{self, WorkflowState, WorkflowStatus},
};
use serde_json::{json, Map, Value};

fn print_prompt(state: &WorkflowState, prompt: &RenderedPrompt) {
    println!("{}", prompt.text.trim_end());
    println!();
    println!(
        "[workflow {} | step {} | {}] prompt saved to {}",
        state.active,
        state.step,
        state.status,
        prompt.saved_to.display()
    );
}

pub fn initiate(
    ctx: &Ctx,
    name: &str,
    required: &[String],
    optional: &[String],
    step: Option<&str>,
) -> anyhow::Result<()> {
    let (state, prompt) =
        workflow::initiate_workflow(&ctx.store, &ctx.renderer(), name, required, optional, step)?;
    if ctx.json {
        return print_json(&json!({ "workflow": state, "prompt": prompt }));
    }
    print_prompt(&state, &prompt);
    Ok(())
}

/// `KEY=VALUE` pairs; an empty value removes the key from the context.
fn parse_vars(vars: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut out = Map::new();
    for pair in vars {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("invalid --var '{pair}': expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("invalid --var '{pair}': empty key");
        }
        let value = if value.is_empty() {
            Value::Null
        } else {
            Value::String(value.to_string())
        };
        out.insert(key.to_string(), value);
    }
    Ok(out)
}

pub fn advance(
    ctx: &Ctx,
    name: &str,
    step: Option<&str>,
    vars: &[String],
    status: Option<&str>,
) -> anyhow::Result<()> {
    let variables = parse_vars(vars)?;
    let status = status.map(str::parse::<WorkflowStatus>).transpose()?;
    let (state, prompt) =
        workflow::advance_workflow(&ctx.store, &ctx.renderer(), name, step, &variables, status)?;
    if ctx.json {
        return print_json(&json!({ "workflow": state, "prompt": prompt }));
    }
    print_prompt(&state, &prompt);
    Ok(())
}

pub fn show(ctx: &Ctx) -> anyhow::Result<()> {
    let state = workflow::get_workflow_state(&ctx.store);
    if ctx.json {
        return print_json(&state);
    }
    match state {
        Some(s) => {
            println!("Workflow: {}", s.active);
            println!("Status:   {}", s.status);
            println!("Step:     {}", s.step);
            println!("Started:  {}", s.started_at.to_rfc3339());
            if !s.context.is_empty() {
                println!("Context:");
                for (k, v) in &s.context {
                    println!("  {k} = {}", agdt_core::keypath::display_value(v));
                }
            }
        }
        None => println!("No active workflow."),
    }
    Ok(())
}

pub fn clear(ctx: &Ctx) -> anyhow::Result<()> {
    let previous = workflow::get_workflow_state(&ctx.store);
    workflow::clear_workflow(&ctx.store)?;
    if ctx.json {
        return print_json(&json!({ "cleared": previous.map(|s| s.active) }));
    }
    match previous {
        Some(s) => println!("Cleared workflow {}.", s.active),
        None => println!("No active workflow."),
    }
    Ok(())
}

pub fn next_prompt(ctx: &Ctx) -> anyhow::Result<()> {
    let next = workflow::get_next_workflow_prompt(&ctx.store, &ctx.renderer())?;
    if ctx.json {
        return print_json(&next);
    }
    match next {
        Some(n) => {
            print_prompt(&n.state, &n.prompt);
            if n.next_step != n.state.step {
                println!(
                    "When done: agdt-advance-workflow {} (next step: {})",
                    n.state.active, n.next_step
                );
            }
        }
        None => println!("No active workflow. Start one with `agdt-initiate-workflow <name>`."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vars_parse_and_empty_value_deletes() {
        let vars = parse_vars(&["a=1".into(), "b=".into(), "c=x=y".into()]).unwrap();
        assert_eq!(vars.get("a"), Some(&json!("1")));
        assert_eq!(vars.get("b"), Some(&Value::Null));
        assert_eq!(vars.get("c"), Some(&json!("x=y")));
        assert!(parse_vars(&["nokey".into()]).is_err());
        assert!(parse_vars(&["=v".into()]).is_err());
    }
}
