/// Errors raised while configuring or running a bi-fidelity active learning experiment.
///
/// Every variant names the component that produced it so a failed run can be
/// traced back to the strategy, the model, the dataset or the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ALError {
    #[error("invalid configuration for {component}: {message}")]
    Config {
        component: &'static str,
        message: String,
    },

    /// Not a failure of the run: the runner treats it as the end of the current round.
    #[error("insufficient budget: {remaining} remaining, cheapest candidate costs {cheapest}")]
    InsufficientBudget { remaining: f64, cheapest: f64 },

    #[error("model {operation} failed: {source}")]
    Model {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("dataset {name}: {message}")]
    Dataset { name: String, message: String },

    #[error("{component}: point {point:?} lies outside the normalized domain [0, 1]")]
    OutOfDomain {
        component: String,
        point: Vec<f64>,
    },

    #[error("failed to write experiment history: {0}")]
    Output(#[source] anyhow::Error),
}

impl ALError {
    pub(crate) fn config(component: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            component,
            message: message.into(),
        }
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, Self::InsufficientBudget { .. })
    }
}

pub type Result<T, E = ALError> = std::result::Result<T, E>;
