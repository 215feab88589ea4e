//! Verification helpers for testing the overlay planner
//!
//! Provides assertion helpers over a [`RecordingSurface`]'s flow tables and
//! tunnel ports.

use std::collections::BTreeSet;
use thiserror::Error;

use overlay_common::FlowRule;
use overlay_types::PortNo;

use crate::RecordingSurface;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected rule '{rule}' not installed")]
    RuleMissing { rule: FlowRule },

    #[error("Rule '{rule}' should not be installed")]
    UnexpectedRule { rule: FlowRule },

    #[error("Expected {expected} rules on {switch}, found {actual}")]
    RuleCountMismatch {
        switch: String,
        expected: usize,
        actual: usize,
    },

    #[error("Expected tunnel port {port} on {switch}")]
    TunnelPortMissing { switch: String, port: PortNo },

    #[error("Tunnel port {port} on {switch} is not above every physical port (highest {highest})")]
    TunnelPortTooLow {
        switch: String,
        port: PortNo,
        highest: PortNo,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Flow table verification helper
pub struct FlowTableVerifier<'a> {
    surface: &'a RecordingSurface,
}

impl<'a> FlowTableVerifier<'a> {
    pub fn new(surface: &'a RecordingSurface) -> Self {
        Self { surface }
    }

    /// Verify that a rule is installed exactly as given
    pub fn assert_rule_present(&self, rule: &FlowRule) -> VerifyResult<()> {
        if self.surface.flows(&rule.switch).contains(rule) {
            Ok(())
        } else {
            Err(VerificationError::RuleMissing { rule: rule.clone() })
        }
    }

    pub fn assert_rule_absent(&self, rule: &FlowRule) -> VerifyResult<()> {
        if self.surface.flows(&rule.switch).contains(rule) {
            Err(VerificationError::UnexpectedRule { rule: rule.clone() })
        } else {
            Ok(())
        }
    }

    pub fn assert_rule_count(&self, switch: &str, expected: usize) -> VerifyResult<()> {
        let actual = self.surface.flows(switch).len();
        if actual == expected {
            Ok(())
        } else {
            Err(VerificationError::RuleCountMismatch {
                switch: switch.to_string(),
                expected,
                actual,
            })
        }
    }

    /// Verify that `switch` holds exactly `expected`, nothing more
    pub fn assert_flow_table<'r>(
        &self,
        switch: &str,
        expected: impl IntoIterator<Item = &'r FlowRule>,
    ) -> VerifyResult<()> {
        let expected: BTreeSet<&FlowRule> = expected.into_iter().collect();
        let actual = self.surface.flows(switch);

        for rule in &expected {
            self.assert_rule_present(rule)?;
        }
        if let Some(extra) = actual.iter().find(|r| !expected.contains(r)) {
            return Err(VerificationError::UnexpectedRule {
                rule: extra.clone(),
            });
        }
        Ok(())
    }

    /// Verify that every tunnel port on `switch` sits above `highest_physical`
    pub fn assert_tunnel_ports_above(
        &self,
        switch: &str,
        highest_physical: PortNo,
    ) -> VerifyResult<()> {
        for spec in self.surface.tunnel_ports(switch) {
            if spec.port <= highest_physical {
                return Err(VerificationError::TunnelPortTooLow {
                    switch: switch.to_string(),
                    port: spec.port,
                    highest: highest_physical,
                });
            }
        }
        Ok(())
    }

    pub fn assert_tunnel_port(&self, switch: &str, port: PortNo) -> VerifyResult<()> {
        if self
            .surface
            .tunnel_ports(switch)
            .iter()
            .any(|spec| spec.port == port)
        {
            Ok(())
        } else {
            Err(VerificationError::TunnelPortMissing {
                switch: switch.to_string(),
                port,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{binding_pair, forward_rule, port};
    use overlay_common::ControlSurface;

    #[tokio::test]
    async fn test_assert_flow_table() {
        let mut surface = RecordingSurface::new();
        let pair = binding_pair("s1", 1, 100, 9);
        for rule in pair.rules() {
            surface.install_flow(rule).await.unwrap();
        }

        let verifier = FlowTableVerifier::new(&surface);
        verifier.assert_flow_table("s1", pair.rules()).unwrap();
        verifier.assert_rule_count("s1", 2).unwrap();

        let stray = forward_rule("s1", 3, 4);
        surface.install_flow(&stray).await.unwrap();
        let verifier = FlowTableVerifier::new(&surface);
        assert!(matches!(
            verifier.assert_flow_table("s1", pair.rules()),
            Err(VerificationError::UnexpectedRule { .. })
        ));
        assert!(verifier.assert_rule_absent(&stray).is_err());
        assert!(verifier.assert_tunnel_port("s1", port(9)).is_err());
    }
}
