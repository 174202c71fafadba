//! Order and payment status vocabulary, and the mapping from gateway
//! statuses onto order statuses.

use serde::Serialize;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
)]
#[serde(rename_all = "snake_case")]

pub enum OrderStatus {
  Pending,
  PaymentInProcess,
  PaymentPending,
  Paid,
  PaymentFailed
}

impl OrderStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      | OrderStatus::Pending => "pending",
      | OrderStatus::PaymentInProcess => {
        "payment_in_process"
      }
      | OrderStatus::PaymentPending => {
        "payment_pending"
      }
      | OrderStatus::Paid => "paid",
      | OrderStatus::PaymentFailed => {
        "payment_failed"
      }
    }
  }

  pub fn parse(
    raw: &str
  ) -> Option<Self> {
    match raw.trim() {
      | "pending" => {
        Some(OrderStatus::Pending)
      }
      | "payment_in_process" => {
        Some(
          OrderStatus::PaymentInProcess
        )
      }
      | "payment_pending" => {
        Some(OrderStatus::PaymentPending)
      }
      | "paid" => Some(OrderStatus::Paid),
      | "payment_failed" => {
        Some(OrderStatus::PaymentFailed)
      }
      | _ => None
    }
  }
}

pub const PAYMENT_PENDING: &str =
  "pending";

pub const PAYMENT_APPROVED: &str =
  "approved";

pub const PAYMENT_IN_PROCESS: &str =
  "in_process";

pub const PAYMENT_REJECTED: &str =
  "rejected";

pub const PAYMENT_CANCELLED: &str =
  "cancelled";

/// Direct string match on the gateway
/// status; anything unrecognised leaves
/// the order waiting.
pub fn order_status_for(
  gateway_status: &str
) -> OrderStatus {
  match gateway_status.trim() {
    | PAYMENT_APPROVED => {
      OrderStatus::Paid
    }
    | PAYMENT_REJECTED
    | PAYMENT_CANCELLED => {
      OrderStatus::PaymentFailed
    }
    | _ => OrderStatus::PaymentPending
  }
}

/// Status the order ends up in. A paid
/// order stays paid when a stale or
/// out-of-order notification arrives.
pub fn next_order_status(
  current: Option<OrderStatus>,
  gateway_status: &str
) -> OrderStatus {
  let target =
    order_status_for(gateway_status);

  match current {
    | Some(OrderStatus::Paid) => {
      OrderStatus::Paid
    }
    | _ => target
  }
}

/// Whether a stored payment is still
/// worth asking the gateway about.
pub fn is_unsettled(
  payment_status: &str
) -> bool {
  matches!(
    payment_status,
    PAYMENT_PENDING | PAYMENT_IN_PROCESS
  )
}

/// PayU transaction `state` values onto
/// the checkout gateway vocabulary.
pub fn payu_state_to_status(
  state: &str
) -> &'static str {
  match state
    .trim()
    .to_ascii_uppercase()
    .as_str()
  {
    | "APPROVED" => PAYMENT_APPROVED,
    | "DECLINED" | "ERROR"
    | "EXPIRED" => PAYMENT_REJECTED,
    | _ => PAYMENT_PENDING
  }
}

/// PayU confirmation `state_pol` codes.
pub fn payu_state_pol_to_status(
  state_pol: &str
) -> &'static str {
  match state_pol.trim() {
    | "4" => PAYMENT_APPROVED,
    | "6" | "104" => PAYMENT_REJECTED,
    | "5" => PAYMENT_CANCELLED,
    | _ => PAYMENT_PENDING
  }
}
