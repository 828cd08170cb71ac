//! Filter expression compiler.
//!
//! Compiles the per-interface comma-separated filter tokens into the
//! socket-level rule set the kernel understands:
//!
//! - `<can_id>:<can_mask>` — accept rule, matches when
//!   `received_id & mask == id & mask`
//! - `<can_id>~<can_mask>` — inverted accept rule, matches when
//!   `received_id & mask != id & mask`
//! - `#<err_mask>` — error-class filter for kernel error-frame reporting
//! - `j` / `J` — join flag: all accept rules must match (logical AND)
//!
//! Ids, masks and the error mask are hexadecimal. An id token of exactly 8
//! hex digits is interpreted as a 29-bit extended id and gets the extended
//! flag OR'd in. Anything else is a parse error; a half-parsed filter set is
//! never applied to a live socket.

use crate::error::{CaptureError, Result};
use crate::types::{CAN_EFF_FLAG, CAN_ERR_FLAG, CAN_INV_FILTER};

/// One compiled accept rule.
///
/// The id word may carry [`CAN_EFF_FLAG`] (extended id) and
/// [`CAN_INV_FILTER`] (inverted match) in-band, exactly as the kernel
/// expects them in `struct can_filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterRule {
    pub id: u32,
    pub mask: u32,
}

impl FilterRule {
    /// Whether this rule uses inverted match semantics.
    pub fn is_inverted(&self) -> bool {
        self.id & CAN_INV_FILTER != 0
    }

    /// Whether a received id satisfies this rule.
    pub fn matches(&self, received_id: u32) -> bool {
        let wanted = (self.id & !CAN_INV_FILTER) & self.mask;
        let hit = received_id & self.mask == wanted;
        if self.is_inverted() { !hit } else { hit }
    }
}

/// A single interface's compiled filter set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    /// Ordered accept rules; empty means accept all data frames.
    pub rules: Vec<FilterRule>,
    /// Error-class mask, 0 when no error frames were requested.
    pub err_mask: u32,
    /// AND semantics across all accept rules instead of the kernel's
    /// default any-match.
    pub join: bool,
}

impl FilterSet {
    /// Compile a list of filter tokens.
    pub fn compile<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        let mut set = FilterSet::default();
        for token in tokens {
            set.push_token(token.as_ref())?;
        }
        Ok(set)
    }

    /// Whether this set is the implicit accept-everything default (`0:0`).
    pub fn is_default(&self) -> bool {
        self.rules.is_empty() && self.err_mask == 0 && !self.join
    }

    /// Whether applying this set needs kernel features beyond plain accept
    /// rules (inverted rules or the join flag).
    pub fn uses_inverted_rules(&self) -> bool {
        self.rules.iter().any(FilterRule::is_inverted)
    }

    fn push_token(&mut self, token: &str) -> Result<()> {
        if token == "j" || token == "J" {
            self.join = true;
            return Ok(());
        }
        if let Some(mask_str) = token.strip_prefix('#') {
            self.err_mask = parse_hex(mask_str, token)?;
            return Ok(());
        }
        if let Some((id_str, mask_str)) = token.split_once(':') {
            self.rules.push(accept_rule(id_str, mask_str, false, token)?);
            return Ok(());
        }
        if let Some((id_str, mask_str)) = token.split_once('~') {
            self.rules.push(accept_rule(id_str, mask_str, true, token)?);
            return Ok(());
        }
        Err(CaptureError::FilterSyntax { token: token.to_string() })
    }
}

fn accept_rule(id_str: &str, mask_str: &str, inverted: bool, token: &str) -> Result<FilterRule> {
    let mut id = parse_hex(id_str, token)?;
    // an 8-digit id is a 29-bit EFF id
    if id_str.len() == 8 {
        id |= CAN_EFF_FLAG;
    }
    if inverted {
        id |= CAN_INV_FILTER;
    }
    // error reporting is governed exclusively by the error mask
    let mask = parse_hex(mask_str, token)? & !CAN_ERR_FLAG;
    Ok(FilterRule { id, mask })
}

fn parse_hex(digits: &str, token: &str) -> Result<u32> {
    u32::from_str_radix(digits, 16)
        .map_err(|_| CaptureError::FilterSyntax { token: token.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CAN_SFF_MASK;
    use proptest::prelude::*;

    #[test]
    fn standard_accept_rule() {
        let set = FilterSet::compile(&["123:7FF"]).unwrap();
        assert_eq!(set.rules, vec![FilterRule { id: 0x123, mask: 0x7FF }]);
        assert_eq!(set.err_mask, 0);
        assert!(!set.join);
        assert!(set.rules[0].matches(0x123));
        assert!(!set.rules[0].matches(0x124));
    }

    #[test]
    fn eight_digit_id_sets_extended_flag() {
        let set = FilterSet::compile(&["12345678:DFFFFFFF"]).unwrap();
        assert_eq!(set.rules[0].id, CAN_EFF_FLAG | 0x1234_5678);
        // mask keeps the EFF bit the caller asked for, minus the error bit
        assert_eq!(set.rules[0].mask, 0xDFFF_FFFF & !CAN_ERR_FLAG);
    }

    #[test]
    fn short_extended_value_stays_standard() {
        // 7 digits: no EFF inference even though the value exceeds 11 bits
        let set = FilterSet::compile(&["1234567:7FF"]).unwrap();
        assert_eq!(set.rules[0].id, 0x123_4567);
    }

    #[test]
    fn inverted_rule_matches_everything_but_the_id() {
        let set = FilterSet::compile(&["0~0"]).unwrap();
        let rule = set.rules[0];
        assert!(rule.is_inverted());
        // mask 0 means the equality always holds, so the inversion never matches
        assert!(!rule.matches(0x0));
        assert!(!rule.matches(0x7FF));

        let set = FilterSet::compile(&["100~7FF"]).unwrap();
        let rule = set.rules[0];
        assert!(!rule.matches(0x100));
        assert!(rule.matches(0x200));
    }

    #[test]
    fn error_mask_token_sets_no_accept_rule() {
        let set = FilterSet::compile(&["#1FFFFFFF"]).unwrap();
        assert!(set.rules.is_empty());
        assert_eq!(set.err_mask, 0x1FFF_FFFF);
    }

    #[test]
    fn join_flag() {
        let set = FilterSet::compile(&["123:7FF", "j"]).unwrap();
        assert!(set.join);
        let set = FilterSet::compile(&["J"]).unwrap();
        assert!(set.join);
    }

    #[test]
    fn data_mask_clears_error_frame_bit() {
        let set = FilterSet::compile(&["0:FFFFFFFF"]).unwrap();
        assert_eq!(set.rules[0].mask & CAN_ERR_FLAG, 0);
    }

    #[test]
    fn zero_tokens_is_the_default_filter() {
        let set = FilterSet::compile::<&str>(&[]).unwrap();
        assert!(set.is_default());
        // the implicit 0:0 rule accepts every data frame
        let accept_all = FilterRule { id: 0, mask: 0 };
        for id in [0u32, 0x123, CAN_SFF_MASK, 0x1FFF_FFFF] {
            assert!(accept_all.matches(id));
        }
    }

    #[test]
    fn unrecognized_tokens_fail_compilation() {
        for bad in ["banana", "123", "123;7FF", "12:zz", ":", "~", "#zz", ""] {
            let err = FilterSet::compile(&[bad]).unwrap_err();
            assert!(
                matches!(err, CaptureError::FilterSyntax { ref token } if token == bad),
                "token {bad:?} should fail as FilterSyntax"
            );
        }
    }

    #[test]
    fn mixed_token_list_compiles_in_order() {
        let set = FilterSet::compile(&["123:7FF", "400:700", "#000000FF", "j"]).unwrap();
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.rules[0].id, 0x123);
        assert_eq!(set.rules[1].id, 0x400);
        assert_eq!(set.err_mask, 0xFF);
        assert!(set.join);
        assert!(!set.uses_inverted_rules());
    }

    proptest! {
        #[test]
        fn prop_accept_rule_agrees_with_mask_equation(
            id in 0u32..=CAN_SFF_MASK,
            mask in 0u32..=CAN_SFF_MASK,
            received in 0u32..=CAN_SFF_MASK,
        ) {
            let token = format!("{id:X}:{mask:X}");
            let set = FilterSet::compile(&[token]).unwrap();
            let rule = set.rules[0];
            prop_assert_eq!(rule.matches(received), received & mask == id & mask);
        }

        #[test]
        fn prop_inverted_rule_is_the_complement(
            id in 0u32..=CAN_SFF_MASK,
            mask in 0u32..=CAN_SFF_MASK,
            received in 0u32..=CAN_SFF_MASK,
        ) {
            let plain = FilterSet::compile(&[format!("{id:X}:{mask:X}")]).unwrap().rules[0];
            let inverted = FilterSet::compile(&[format!("{id:X}~{mask:X}")]).unwrap().rules[0];
            prop_assert_eq!(plain.matches(received), !inverted.matches(received));
        }
    }
}
