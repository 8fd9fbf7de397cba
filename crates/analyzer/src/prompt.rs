//! Prompt assembly for the analysis model call.

use rt_domain::run::RunStatus;

/// Build the user prompt for a run's analysis. The shape of this template
/// is part of the external contract and must not be reworded casually.
pub fn build_user_prompt(
    status: RunStatus,
    exit_code: Option<i32>,
    truncated_content: &str,
) -> String {
    let exit_code = match exit_code {
        Some(c) => c.to_string(),
        None => "unknown".into(),
    };

    let guidance = if status == RunStatus::Failed {
        "3. The root cause of the failure (specific line/error if possible)\n\
         4. Suggested fixes or next steps"
    } else {
        "3. Any warnings or noteworthy observations"
    };

    format!(
        "Analyze the following script execution logs:\n\
         \n\
         Execution Status: {status}\n\
         Exit Code: {exit_code}\n\
         \n\
         Logs:\n\
         {truncated_content}\n\
         \n\
         Please provide:\n\
         1. A brief summary of what the script did\n\
         2. Key events or milestones\n\
         {guidance}",
        status = status.as_str(),
    )
}
