//! The masking strategies themselves: each is a total function from string
//! to string that degrades to "all characters replaced by `*`" rather than
//! leak residue on short or malformed input.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskType {
    Rrn,
    Phone,
    Email,
    CreditCard,
    Password,
    Ssn,
    Name,
    Address,
    AccountNumber,
}

/// Dispatch to the strategy for `mask_type`. Callers are expected to have
/// already handled the null/empty passthrough case.
pub fn mask(mask_type: MaskType, input: &str) -> String {
    match mask_type {
        MaskType::Rrn => mask_rrn(input),
        MaskType::Phone => mask_phone(input),
        MaskType::Email => mask_email(input),
        MaskType::CreditCard => mask_credit_card(input),
        MaskType::Password => mask_password(input),
        MaskType::Ssn => mask_ssn(input),
        MaskType::Name => mask_name(input),
        MaskType::Address => mask_address(input),
        MaskType::AccountNumber => mask_account_number(input),
    }
}

fn all_stars(input: &str) -> String {
    "*".repeat(input.chars().count())
}

/// Preserve the first 6 chars and the following separator if present;
/// replace all trailing digits with `*`.
fn mask_rrn(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() < 6 {
        return all_stars(input);
    }
    let mut out: String = chars[0..6].iter().collect();
    let mut idx = 6;
    if idx < chars.len() && !chars[idx].is_ascii_digit() {
        out.push(chars[idx]);
        idx += 1;
    }
    out.extend(std::iter::repeat('*').take(chars.len() - idx));
    out
}

/// Preserve the first group and the last 4 digits; replace the middle group
/// with 4 `*`. Expects a `group-group-group` shape; anything else degrades.
fn mask_phone(input: &str) -> String {
    let parts: Vec<&str> = input.split('-').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return all_stars(input);
    }
    let last = parts[2];
    if last.chars().count() < 4 {
        return all_stars(input);
    }
    let last4: String = last.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{}-****-{}", parts[0], last4)
}

/// Preserve the first char of the local part and the entire domain; replace
/// the rest of the local part with exactly 3 `*`.
fn mask_email(input: &str) -> String {
    let Some(at_pos) = input.find('@') else {
        return all_stars(input);
    };
    let (local, domain) = (&input[..at_pos], &input[at_pos + 1..]);
    let mut local_chars = local.chars();
    let Some(first) = local_chars.next() else {
        return all_stars(input);
    };
    if domain.is_empty() {
        return all_stars(input);
    }
    format!("{}***@{}", first, domain)
}

/// Mask all groups except the last 4 digits; preserve separator structure.
fn mask_credit_card(input: &str) -> String {
    let sep = if input.contains('-') {
        Some('-')
    } else if input.contains(' ') {
        Some(' ')
    } else {
        None
    };

    match sep {
        Some(sep) => {
            let parts: Vec<&str> = input.split(sep).collect();
            if parts.len() < 2 {
                return all_stars(input);
            }
            let last = parts[parts.len() - 1];
            let masked: Vec<String> = parts[..parts.len() - 1]
                .iter()
                .map(|p| "*".repeat(p.chars().count()))
                .chain(std::iter::once(last.to_string()))
                .collect();
            masked.join(&sep.to_string())
        }
        None => {
            let chars: Vec<char> = input.chars().collect();
            if chars.len() < 4 {
                return all_stars(input);
            }
            let split = chars.len() - 4;
            let mut out: String = "*".repeat(split);
            out.extend(&chars[split..]);
            out
        }
    }
}

/// Always exactly 8 `*`, regardless of input length.
fn mask_password(_input: &str) -> String {
    "*".repeat(8)
}

/// Preserve the last 4 chars; mask the rest while preserving hyphens.
fn mask_ssn(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let digit_positions: Vec<usize> = chars
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i)
        .collect();

    if digit_positions.len() < 4 {
        return all_stars(input);
    }

    let keep: std::collections::HashSet<usize> =
        digit_positions[digit_positions.len() - 4..].iter().copied().collect();

    chars
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if *c == '-' {
                '-'
            } else if keep.contains(&i) {
                *c
            } else {
                '*'
            }
        })
        .collect()
}

/// Preserve the first char of each whitespace-separated token; replace the
/// rest with `*` per char.
fn mask_name(input: &str) -> String {
    input
        .split(' ')
        .map(|token| {
            let mut chars = token.chars();
            match chars.next() {
                Some(first) => {
                    let rest = chars.count();
                    format!("{}{}", first, "*".repeat(rest))
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replace each non-space char with `*`.
fn mask_address(input: &str) -> String {
    input
        .chars()
        .map(|c| if c == ' ' { ' ' } else { '*' })
        .collect()
}

/// Preserve the last 4 digits; mask all others.
fn mask_account_number(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() < 4 {
        return all_stars(input);
    }
    let split = chars.len() - 4;
    let mut out: String = "*".repeat(split);
    out.extend(&chars[split..]);
    out
}
