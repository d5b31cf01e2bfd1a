pub mod coupon_service;
pub mod ledger_service;
pub mod role_service;
