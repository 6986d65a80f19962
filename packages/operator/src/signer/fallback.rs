//! What to do when an outbound transaction cannot be built or broadcast

use multichain_rs::AdapterError;

use crate::retry::{classify_error, ErrorClass};

/// Programs a gateway call may legitimately invoke on its own
const BUILTIN_PROGRAMS: &[&str] = &[
    "11111111111111111111111111111111",
    "ComputeBudget111111111111111111111111111111",
    "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
    "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL",
];

const NONCE_RACE_MARKERS: &[&str] = &["nonce already used", "nonce mismatch", "nonce too low"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    /// Re-sign an increment-nonce-only transaction for the same nonce
    Fallback { reason: String },
    /// Nonce race or transient rejection: retry the same payload next round
    RetryOriginal,
    /// Abandon this round; the CCTX stays pending
    GiveUp,
}

/// Decide how to recover from a failed build or broadcast
pub fn classify_failure(error: &AdapterError, gateway: &str) -> FailureAction {
    match error {
        AdapterError::TooLarge { size, max } => FailureAction::Fallback {
            reason: format!("transaction too large ({} > {})", size, max),
        },
        AdapterError::BroadcastRejected { reason, logs } => {
            if let Some(program) = foreign_program_after_gateway(logs, gateway) {
                return FailureAction::Fallback {
                    reason: format!("program {} failed after gateway", program),
                };
            }
            if has_nonce_race(reason, logs) {
                return FailureAction::RetryOriginal;
            }
            match classify_error(reason) {
                ErrorClass::Transient | ErrorClass::Underpriced | ErrorClass::NonceTooHigh => {
                    FailureAction::RetryOriginal
                }
                _ => FailureAction::Fallback {
                    reason: reason.clone(),
                },
            }
        }
        AdapterError::Unsupported(reason) | AdapterError::InvalidAddress(reason) => {
            FailureAction::Fallback {
                reason: reason.clone(),
            }
        }
        AdapterError::Rpc(_)
        | AdapterError::Decode(_)
        | AdapterError::Signing(_)
        | AdapterError::InsufficientFunds(_) => FailureAction::GiveUp,
    }
}

fn has_nonce_race(reason: &str, logs: &[String]) -> bool {
    std::iter::once(reason)
        .chain(logs.iter().map(String::as_str))
        .map(str::to_lowercase)
        .any(|line| NONCE_RACE_MARKERS.iter().any(|m| line.contains(m)))
}

/// First non-builtin program invoked after the gateway's own invocation
pub fn foreign_program_after_gateway(logs: &[String], gateway: &str) -> Option<String> {
    let mut seen_gateway = false;
    for line in logs {
        let Some(program) = invoked_program(line) else {
            continue;
        };
        if program == gateway {
            seen_gateway = true;
        } else if seen_gateway && !BUILTIN_PROGRAMS.contains(&program) {
            return Some(program.to_string());
        }
    }
    None
}

/// `Program <id> invoke [<depth>]`
fn invoked_program(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("Program ")?;
    let (program, tail) = rest.split_once(' ')?;
    tail.starts_with("invoke").then_some(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GATEWAY: &str = "ZETAjseVjuFsxdRxo6MmTCvqFwb3ZHUx56Co3vCmGis";

    fn logs(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_too_large_falls_back() {
        let action = classify_failure(&AdapterError::TooLarge { size: 1300, max: 1232 }, GATEWAY);
        assert!(matches!(action, FailureAction::Fallback { .. }));
    }

    #[test]
    fn test_foreign_program_after_gateway_falls_back() {
        let err = AdapterError::BroadcastRejected {
            reason: "custom program error: 0x1".to_string(),
            logs: logs(&[
                "Program ComputeBudget111111111111111111111111111111 invoke [1]",
                &format!("Program {} invoke [1]", GATEWAY),
                "Program log: Instruction: Withdraw",
                "Program 11111111111111111111111111111111 invoke [2]",
                "Program 9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin invoke [2]",
                "Program 9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin failed: custom program error: 0x1",
            ]),
        };
        assert_eq!(
            foreign_program_after_gateway(err.logs(), GATEWAY).as_deref(),
            Some("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin")
        );
        assert!(matches!(
            classify_failure(&err, GATEWAY),
            FailureAction::Fallback { .. }
        ));
    }

    #[test]
    fn test_program_before_gateway_ignored() {
        let lines = logs(&[
            "Program 9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin invoke [1]",
            &format!("Program {} invoke [1]", GATEWAY),
            "Program TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA invoke [2]",
        ]);
        assert_eq!(foreign_program_after_gateway(&lines, GATEWAY), None);
    }

    #[test]
    fn test_nonce_race_retries_original() {
        let err = AdapterError::BroadcastRejected {
            reason: "custom program error: 0x1771".to_string(),
            logs: logs(&[
                &format!("Program {} invoke [1]", GATEWAY),
                "Program log: Error: nonce already used",
            ]),
        };
        assert_eq!(classify_failure(&err, GATEWAY), FailureAction::RetryOriginal);

        let evm = AdapterError::BroadcastRejected {
            reason: "nonce too low".to_string(),
            logs: Vec::new(),
        };
        assert_eq!(classify_failure(&evm, GATEWAY), FailureAction::RetryOriginal);
    }

    #[test]
    fn test_unexplained_rejection_falls_back() {
        let err = AdapterError::BroadcastRejected {
            reason: "execution reverted".to_string(),
            logs: Vec::new(),
        };
        assert!(matches!(
            classify_failure(&err, "0xgateway"),
            FailureAction::Fallback { .. }
        ));
    }

    #[test]
    fn test_transport_errors_give_up() {
        assert_eq!(
            classify_failure(&AdapterError::Rpc("timeout".into()), GATEWAY),
            FailureAction::GiveUp
        );
        assert_eq!(
            classify_failure(&AdapterError::InsufficientFunds("tss".into()), GATEWAY),
            FailureAction::GiveUp
        );
    }
}
