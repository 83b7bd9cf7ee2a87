//! Gateway types module
//!
//! - [`response`]: `ApiResponse` envelope, `ApiError`, error codes
//! - [`dto`]: request bodies and buyer-facing views

pub mod dto;
pub mod response;

pub use dto::{
    AdjustView, AdminAdjustBody, AdminRefundBody, BalanceView, CaptureBody, CheckoutBody,
    CompleteFulfillmentBody, GiftCardBody, GuestCredentials, GuestPayBody, PageQuery,
    PaymentView, RechargeView,
};
pub use response::{ApiError, ApiResponse, ApiResult, error_codes, ok};
