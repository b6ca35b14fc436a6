//! Instructions and status messages used by the kickoff sequence.

pub(crate) const BRIEFING_THINKING: &str = "Initiating project kickoff sequence...";
pub(crate) const REQUIREMENTS_THINKING: &str = "Analyzing requirements...";
pub(crate) const ARCHITECTURE_THINKING: &str = "Defining architecture...";
pub(crate) const DESIGN_THINKING: &str = "Designing UI/UX...";
pub(crate) const IMPLEMENT_THINKING: &str = "Implementing core features...";
pub(crate) const FIX_THINKING: &str = "Fixing issues reported by QA...";
pub(crate) const TEST_THINKING: &str = "Testing implementation...";
pub(crate) const DEPLOY_THINKING: &str = "Preparing deployment pipeline...";

pub const QA_REJECTED: &str = "❌ QA found critical issues! Sending back to Developer.";
pub const QA_APPROVED: &str = "✅ QA Approved! All tests passed.";
pub const KICKOFF_COMPLETED: &str = "Workflow Completed Successfully. Team is ready.";

pub(crate) const FIX_ISSUES: &str = "Fix the bugs reported by QA and optimize the code.";
pub(crate) const DEPLOYMENT: &str = "Create CI/CD pipeline configuration.";

pub(crate) fn briefing(project_name: &str) -> String {
    format!("Initiate project kickoff for '{project_name}'. Brief the team on the objectives.")
}

pub(crate) fn requirements(project_description: &str) -> String {
    format!("Analyze project '{project_description}'. Create 3 high-level User Stories.")
}

/// Asks for architecture prose followed by a JSON task array.
pub(crate) fn architecture(stories: &str) -> String {
    format!(
        "Based on requirements:\n{stories}\n\nDefine technical architecture and stack.\n\n\
         IMPORTANT: AFTER the architecture, provide a list of development tasks in this EXACT \
         JSON format:\n[\n  {{ \"title\": \"Task Title\", \"description\": \"Task Description\" }}\n]"
    )
}

pub(crate) fn design(stories: &str) -> String {
    format!("Based on requirements:\n{stories}\n\nCreate a UI structure.")
}

pub(crate) fn implement(design: &str, architecture: &str) -> String {
    format!("Implement core structure based on design:\n{design}\n\nAnd architecture:\n{architecture}")
}

pub(crate) fn test(implementation: &str) -> String {
    format!("Test this implementation:\n{implementation}\n\nAnalyze for bugs and issues.")
}
