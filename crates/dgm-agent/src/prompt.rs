//! Prompt builder for the developer oracle
//!
//! Packs the parent's code verbatim together with its failure and success
//! evidence. The wording is deliberately plain; the engine only depends on
//! the reply being a full replacement program.

use dgm_core::Observation;

use crate::types::MutationRequest;

/// System and user halves of a developer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeveloperPrompt {
    pub system: String,
    pub user: String,
}

/// Build the prompt for one mutation request
pub fn build_developer_prompt(request: &MutationRequest) -> DeveloperPrompt {
    let mut system = String::new();
    system.push_str(&format!(
        "You maintain agent {} and must produce an improved version of its code.\n\n",
        request.parent_id
    ));
    system.push_str("Rules:\n");
    system.push_str("1. Change the code. Returning it unchanged is discarded.\n");
    system.push_str("2. Reply with the complete program only, no explanations.\n");
    system.push_str("3. Keep the agent's entry point and command-line behavior intact.\n");
    system.push_str(&format!(
        "4. The agent's internal model must remain \"{}\".\n",
        request.task_model
    ));
    if request.attempt > 1 {
        system.push_str(&format!(
            "\nThis is attempt {}; earlier proposals were rejected.\n",
            request.attempt
        ));
    }

    let mut user = String::new();
    user.push_str(&format!("## AGENT CODE ({})\n\n", request.parent_id));
    user.push_str(request.parent_code.text());
    user.push_str("\n\n## FAILED EXAMPLES\n\n");
    push_observations(&mut user, &request.failures);

    user.push_str("## SUCCESSFUL EXAMPLES\n\n");
    if request.successes.is_empty() {
        user.push_str("No successful examples were provided for reference.\n\n");
    } else {
        push_observations(&mut user, &request.successes);
    }

    user.push_str("## TASK\n\n");
    user.push_str(
        "Write the complete next version of the agent that fixes these failures \
         without breaking the successes.\n",
    );

    DeveloperPrompt { system, user }
}

fn push_observations(out: &mut String, observations: &[Observation]) {
    for obs in observations {
        out.push_str(&format!("- Q: {}\n", obs.input));
        out.push_str(&format!("  A (correct): {}\n", obs.expected));
        out.push_str(&format!("  A (agent): {}\n\n", obs.actual));
    }
}
