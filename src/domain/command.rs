use crate::domain::Money;

/// One gateway request, with accounts named by email and fund requests by a
/// caller-chosen label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open {
        email: String,
    },
    AddFunds {
        email: String,
        amount: Money,
        description: String,
    },
    Withdraw {
        email: String,
        amount: Money,
        description: String,
    },
    Transfer {
        email: String,
        recipient: String,
        amount: Money,
        description: String,
    },
    RequestFunds {
        email: String,
        label: String,
        amount: Money,
        reason: String,
    },
    Approve {
        label: String,
    },
    Reject {
        label: String,
        reason: String,
    },
}

impl core::fmt::Display for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Command::Open { email } => write!(f, "open,account={}", email),
            Command::AddFunds { email, amount, .. } => {
                write!(f, "add_funds,account={},amount={}", email, amount)
            }
            Command::Withdraw { email, amount, .. } => {
                write!(f, "withdraw,account={},amount={}", email, amount)
            }
            Command::Transfer {
                email,
                recipient,
                amount,
                ..
            } => write!(f, "transfer,account={},to={},amount={}", email, recipient, amount),
            Command::RequestFunds {
                email,
                label,
                amount,
                ..
            } => write!(f, "request,account={},label={},amount={}", email, label, amount),
            Command::Approve { label } => write!(f, "approve,label={}", label),
            Command::Reject { label, .. } => write!(f, "reject,label={}", label),
        }
    }
}
