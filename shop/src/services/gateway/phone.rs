// shop/src/services/gateway/phone.rs

/// Normalizes a Kenyan mobile number to the `2547XXXXXXXX` / `2541XXXXXXXX` form.
///
/// Accepts `07…`/`01…`, bare nine-digit `7…`/`1…`, and `254…` with or
/// without a leading `+`. Spaces, dashes and parentheses are ignored.
pub fn normalize_phone(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  let without_plus = trimmed.strip_prefix('+').unwrap_or(trimmed);
  let digits: String = without_plus
    .chars()
    .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
    .collect();
  if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
    return None;
  }

  let subscriber = if digits.len() == 12 && digits.starts_with("254") {
    &digits[3..]
  } else if digits.len() == 10 && digits.starts_with('0') {
    &digits[1..]
  } else if digits.len() == 9 {
    digits.as_str()
  } else {
    return None;
  };

  if subscriber.starts_with('7') || subscriber.starts_with('1') {
    Some(format!("254{}", subscriber))
  } else {
    None
  }
}
