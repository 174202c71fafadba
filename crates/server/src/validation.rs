//! Payload field checks shared by the handlers and the ops CLI.

use chrono::NaiveDate;

use crate::errors::ServerError;

pub const MIN_PASSWORD_LEN: usize = 8;

pub const MAX_PHONE_LEN: usize = 13;

pub const MAX_PRODUCT_NAME_LEN: usize =
  45;

pub const MAX_DESCRIPTION_LEN: usize =
  200;

pub const MAX_ADDRESS_LEN: usize = 100;

const IMAGE_EXTENSIONS: [&str; 4] =
  ["png", "jpg", "jpeg", "webp"];

/// Trimmed, lowercased email or 400.
pub fn normalize_email(
  raw: &str
) -> Result<String, ServerError> {
  let email = raw.trim().to_lowercase();

  if is_valid_email(&email) {
    Ok(email)
  } else {
    Err(ServerError::bad_request(
      "invalid email"
    ))
  }
}

pub fn is_valid_email(
  email: &str
) -> bool {
  let Some((local, domain)) =
    email.split_once('@')
  else {
    return false;
  };

  !local.is_empty()
    && !domain.contains('@')
    && domain
      .split('.')
      .filter(|part| !part.is_empty())
      .count()
      >= 2
    && !domain.starts_with('.')
    && !domain.ends_with('.')
    && !email.contains(char::is_whitespace)
}

pub fn check_password(
  password: &str
) -> Result<(), ServerError> {
  if password.chars().count()
    < MIN_PASSWORD_LEN
  {
    return Err(ServerError::bad_request(
      format!(
        "password must be at least \
         {MIN_PASSWORD_LEN} characters"
      )
    ));
  }
  Ok(())
}

pub fn check_phone(
  phone: &str
) -> Result<(), ServerError> {
  if phone.trim().chars().count()
    > MAX_PHONE_LEN
  {
    return Err(ServerError::bad_request(
      format!(
        "phone must be at most \
         {MAX_PHONE_LEN} characters"
      )
    ));
  }
  Ok(())
}

/// http(s) URL whose path ends in one of
/// the accepted image extensions. Query
/// strings and fragments are ignored.
pub fn is_valid_image_url(
  url: &str
) -> bool {
  let url = url.trim();
  let lower = url.to_ascii_lowercase();

  let rest = if let Some(rest) =
    lower.strip_prefix("https://")
  {
    rest
  } else if let Some(rest) =
    lower.strip_prefix("http://")
  {
    rest
  } else {
    return false;
  };

  let path = rest
    .split(['?', '#'])
    .next()
    .unwrap_or_default();

  let Some((host, path)) =
    path.split_once('/')
  else {
    return false;
  };

  if host.is_empty() {
    return false;
  }

  path
    .rsplit_once('.')
    .map(|(_, ext)| {
      IMAGE_EXTENSIONS.contains(&ext)
    })
    .unwrap_or(false)
}

pub fn check_image_url(
  url: &str
) -> Result<(), ServerError> {
  if is_valid_image_url(url) {
    Ok(())
  } else {
    Err(ServerError::bad_request(
      "image url must be http(s) and \
       end in png, jpg, jpeg or webp"
    ))
  }
}

/// Non-empty after trimming and at most
/// `max` characters.
pub fn required_text<'a>(
  field: &str,
  value: &'a str,
  max: usize
) -> Result<&'a str, ServerError> {
  let value = value.trim();

  if value.is_empty() {
    return Err(ServerError::bad_request(
      format!("{field} required")
    ));
  }
  optional_text(field, value, max)
}

pub fn optional_text<'a>(
  field: &str,
  value: &'a str,
  max: usize
) -> Result<&'a str, ServerError> {
  let value = value.trim();

  if value.chars().count() > max {
    return Err(ServerError::bad_request(
      format!(
        "{field} must be at most {max} \
         characters"
      )
    ));
  }
  Ok(value)
}

/// `YYYY-MM-DD`, normalised.
pub fn parse_delivery_date(
  raw: &str
) -> Result<String, ServerError> {
  NaiveDate::parse_from_str(
    raw.trim(),
    "%Y-%m-%d"
  )
  .map(|date| {
    date.format("%Y-%m-%d").to_string()
  })
  .map_err(|_| {
    ServerError::bad_request(
      "delivery_date must be YYYY-MM-DD"
    )
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn emails_need_at_and_dotted_domain() {
    assert!(is_valid_email(
      "ana@example.com"
    ));
    assert!(is_valid_email(
      "a.b@mail.example.ar"
    ));
    assert!(!is_valid_email(
      "ana.example.com"
    ));
    assert!(!is_valid_email("ana@example"));
    assert!(!is_valid_email("@example.com"));
    assert!(!is_valid_email(
      "ana@example.com."
    ));
    assert!(!is_valid_email(
      "ana @example.com"
    ));
  }

  #[test]
  fn email_is_normalised() {
    assert_eq!(
      normalize_email(" Ana@Example.COM ")
        .unwrap(),
      "ana@example.com"
    );
    assert!(normalize_email("nope").is_err());
  }

  #[test]
  fn password_and_phone_lengths() {
    assert!(check_password("1234567").is_err());
    assert!(check_password("12345678").is_ok());
    assert!(check_phone("3515551234").is_ok());
    assert!(check_phone("+5493515551234").is_err());
  }

  #[test]
  fn image_urls_by_scheme_and_extension() {
    for ok in [
      "https://cdn.example.com/a.png",
      "http://cdn.example.com/p/b.JPG",
      "https://cdn.example.com/c.jpeg?w=200",
      "https://cdn.example.com/d.webp#x"
    ] {
      assert!(is_valid_image_url(ok), "{ok}");
    }
    for bad in [
      "ftp://cdn.example.com/a.png",
      "https://cdn.example.com/a.gif",
      "https://cdn.example.com/",
      "https://a.png",
      "cdn.example.com/a.png",
      ""
    ] {
      assert!(
        !is_valid_image_url(bad),
        "{bad}"
      );
    }
  }

  #[test]
  fn text_limits() {
    assert!(
      required_text("name", "  ", 45).is_err()
    );
    assert_eq!(
      required_text("name", " Pizza ", 45)
        .unwrap(),
      "Pizza"
    );
    assert!(optional_text(
      "description",
      &"x".repeat(201),
      200
    )
    .is_err());
  }

  #[test]
  fn delivery_dates() {
    assert_eq!(
      parse_delivery_date("2025-03-09")
        .unwrap(),
      "2025-03-09"
    );
    assert!(
      parse_delivery_date("09/03/2025")
        .is_err()
    );
    assert!(
      parse_delivery_date("2025-02-30")
        .is_err()
    );
  }
}
