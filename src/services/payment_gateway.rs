//! Payment gateway signing
//!
//! Outbound checkout links and inbound callbacks are both signed with
//! HMAC-SHA512 over a canonical string: parameters sorted by key, each key and
//! value form-urlencoded, `key=value` pairs joined with `&`.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};
use url::form_urlencoded;
use uuid::Uuid;

use crate::config::PaymentGatewayConfig;
use crate::entities::order::Model as OrderModel;
use crate::errors::ServiceError;
use crate::money::{from_minor_units, to_minor_units};

type HmacSha512 = Hmac<Sha512>;

pub const PARAM_VERSION: &str = "vnp_Version";
pub const PARAM_COMMAND: &str = "vnp_Command";
pub const PARAM_MERCHANT_CODE: &str = "vnp_TmnCode";
pub const PARAM_AMOUNT: &str = "vnp_Amount";
pub const PARAM_CURRENCY: &str = "vnp_CurrCode";
pub const PARAM_TXN_REF: &str = "vnp_TxnRef";
pub const PARAM_ORDER_INFO: &str = "vnp_OrderInfo";
pub const PARAM_ORDER_TYPE: &str = "vnp_OrderType";
pub const PARAM_LOCALE: &str = "vnp_Locale";
pub const PARAM_RETURN_URL: &str = "vnp_ReturnUrl";
pub const PARAM_IP_ADDR: &str = "vnp_IpAddr";
pub const PARAM_CREATE_DATE: &str = "vnp_CreateDate";
pub const PARAM_EXPIRE_DATE: &str = "vnp_ExpireDate";
pub const PARAM_RESPONSE_CODE: &str = "vnp_ResponseCode";
pub const PARAM_TRANSACTION_STATUS: &str = "vnp_TransactionStatus";
pub const PARAM_TRANSACTION_NO: &str = "vnp_TransactionNo";

const ORDER_INFO_PREFIX: &str = "Payment for order";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Classification of an inbound callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationOutcome {
    SignatureInvalid,
    PaymentSuccess,
    PaymentFailure,
}

/// `k=v&k=v` over the parameters in ascending key order, keys and values form-urlencoded.
pub fn canonical_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// Typed view over the parameters of a gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams<'a> {
    params: &'a BTreeMap<String, String>,
}

impl<'a> CallbackParams<'a> {
    pub fn new(params: &'a BTreeMap<String, String>) -> Self {
        Self { params }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Order id carried in the order-info text, falling back to the merchant reference.
    pub fn order_id(&self) -> Result<Uuid, ServiceError> {
        let from_info = self
            .get(PARAM_ORDER_INFO)
            .and_then(|info| info.split_whitespace().last())
            .and_then(|token| Uuid::parse_str(token).ok());
        if let Some(order_id) = from_info {
            return Ok(order_id);
        }

        self.get(PARAM_TXN_REF)
            .and_then(|txn_ref| Uuid::parse_str(txn_ref).ok())
            .ok_or_else(|| {
                ServiceError::ValidationError("Callback does not identify an order".to_string())
            })
    }

    /// Gateway transaction number, or the merchant reference when the gateway sent none.
    pub fn transaction_ref(&self) -> Result<String, ServiceError> {
        self.get(PARAM_TRANSACTION_NO)
            .or_else(|| self.get(PARAM_TXN_REF))
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::ValidationError(
                    "Callback does not carry a transaction reference".to_string(),
                )
            })
    }

    /// Idempotency key for the callback ledger: `<merchant reference>:<transaction number>`.
    ///
    /// Transaction numbers repeat across orders (failed payments all carry `0`),
    /// so the merchant reference scopes them.
    pub fn callback_key(&self) -> Result<String, ServiceError> {
        let txn_ref = self.get(PARAM_TXN_REF).ok_or_else(|| {
            ServiceError::ValidationError("Callback does not carry a merchant reference".to_string())
        })?;
        let transaction_no = self.get(PARAM_TRANSACTION_NO).unwrap_or_default();
        Ok(format!("{}:{}", txn_ref.trim(), transaction_no.trim()))
    }

    /// Paid amount in major units.
    pub fn amount(&self) -> Result<Decimal, ServiceError> {
        let raw = self.get(PARAM_AMOUNT).ok_or_else(|| {
            ServiceError::ValidationError("Callback does not carry an amount".to_string())
        })?;
        raw.trim()
            .parse::<i64>()
            .map(from_minor_units)
            .map_err(|_| ServiceError::ValidationError(format!("Invalid callback amount {}", raw)))
    }

    pub fn response_code(&self) -> Option<&'a str> {
        self.get(PARAM_RESPONSE_CODE)
    }

    pub fn transaction_status(&self) -> Option<&'a str> {
        self.get(PARAM_TRANSACTION_STATUS)
    }
}

/// Signs outbound gateway requests and verifies inbound callbacks.
#[derive(Clone)]
pub struct PaymentCallbackVerifier {
    config: PaymentGatewayConfig,
}

impl std::fmt::Debug for PaymentCallbackVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentCallbackVerifier")
            .field("payment_url", &self.config.payment_url)
            .field("merchant_code", &self.config.merchant_code)
            .finish_non_exhaustive()
    }
}

impl PaymentCallbackVerifier {
    pub fn new(config: PaymentGatewayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PaymentGatewayConfig {
        &self.config
    }

    fn mac(&self) -> Result<HmacSha512, ServiceError> {
        HmacSha512::new_from_slice(self.config.secret_key.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("Invalid gateway secret: {}", e)))
    }

    /// Lowercase hex HMAC-SHA512 of the canonical string.
    pub fn sign(&self, params: &BTreeMap<String, String>) -> Result<String, ServiceError> {
        let mut mac = self.mac()?;
        mac.update(canonical_string(params).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// `base_url?<canonical>&<signature param>=<signature>`.
    pub fn build_signed_url(
        &self,
        base_url: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<String, ServiceError> {
        let signature = self.sign(params)?;
        let separator = if base_url.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{}{}&{}={}",
            base_url,
            separator,
            canonical_string(params),
            encode(&self.config.signature_param),
            signature
        ))
    }

    /// Request parameters for sending `order` to the hosted checkout page.
    pub fn checkout_params(
        &self,
        order: &OrderModel,
        currency: &str,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, String>, ServiceError> {
        let offset = FixedOffset::east_opt(self.config.utc_offset_minutes * 60).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Invalid gateway UTC offset {} minutes",
                self.config.utc_offset_minutes
            ))
        })?;
        let created = now.with_timezone(&offset);
        let expires = created + Duration::minutes(self.config.expiry_minutes);

        let mut params = BTreeMap::new();
        params.insert(PARAM_VERSION.to_string(), self.config.version.clone());
        params.insert(PARAM_COMMAND.to_string(), self.config.command.clone());
        params.insert(
            PARAM_MERCHANT_CODE.to_string(),
            self.config.merchant_code.clone(),
        );
        params.insert(
            PARAM_AMOUNT.to_string(),
            to_minor_units(order.final_total)?.to_string(),
        );
        params.insert(PARAM_CURRENCY.to_string(), currency.to_string());
        params.insert(PARAM_TXN_REF.to_string(), order.id.simple().to_string());
        params.insert(
            PARAM_ORDER_INFO.to_string(),
            format!("{} {}", ORDER_INFO_PREFIX, order.id),
        );
        params.insert(PARAM_ORDER_TYPE.to_string(), self.config.order_type.clone());
        params.insert(PARAM_LOCALE.to_string(), self.config.locale.clone());
        params.insert(PARAM_RETURN_URL.to_string(), self.config.return_url.clone());
        params.insert(PARAM_IP_ADDR.to_string(), client_ip.to_string());
        params.insert(
            PARAM_CREATE_DATE.to_string(),
            created.format(TIMESTAMP_FORMAT).to_string(),
        );
        params.insert(
            PARAM_EXPIRE_DATE.to_string(),
            expires.format(TIMESTAMP_FORMAT).to_string(),
        );
        Ok(params)
    }

    /// Signed redirect URL for `order`.
    pub fn payment_url(
        &self,
        order: &OrderModel,
        currency: &str,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let params = self.checkout_params(order, currency, client_ip, now)?;
        self.build_signed_url(&self.config.payment_url, &params)
    }

    /// Checks the signature on a callback and classifies the payment result.
    pub fn verify(&self, raw_params: &BTreeMap<String, String>) -> VerificationOutcome {
        let Some(provided) = raw_params.get(&self.config.signature_param) else {
            warn!("Gateway callback carries no signature");
            return VerificationOutcome::SignatureInvalid;
        };
        let Ok(provided) = hex::decode(provided.trim()) else {
            warn!("Gateway callback signature is not valid hex");
            return VerificationOutcome::SignatureInvalid;
        };

        let signed: BTreeMap<String, String> = raw_params
            .iter()
            .filter(|(key, _)| {
                **key != self.config.signature_param && **key != self.config.signature_type_param
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut mac = match self.mac() {
            Ok(mac) => mac,
            Err(e) => {
                error!("{}", e);
                return VerificationOutcome::SignatureInvalid;
            }
        };
        mac.update(canonical_string(&signed).as_bytes());
        if mac.verify_slice(&provided).is_err() {
            warn!("Gateway callback signature mismatch");
            return VerificationOutcome::SignatureInvalid;
        }

        let callback = CallbackParams::new(raw_params);
        let success = &self.config.success_code;
        let response_ok = callback.response_code() == Some(success.as_str());
        let status_ok = callback
            .transaction_status()
            .map_or(true, |status| status == success);

        debug!(
            response_code = callback.response_code().unwrap_or_default(),
            "Gateway callback signature verified"
        );
        if response_ok && status_ok {
            VerificationOutcome::PaymentSuccess
        } else {
            VerificationOutcome::PaymentFailure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::{OrderStatus, PaymentType};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn verifier() -> PaymentCallbackVerifier {
        PaymentCallbackVerifier::new(PaymentGatewayConfig {
            merchant_code: "DEMO0001".into(),
            secret_key: "sandbox-secret".into(),
            ..PaymentGatewayConfig::default()
        })
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn order(final_total: Decimal) -> OrderModel {
        let now = Utc::now();
        OrderModel {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            status: OrderStatus::PendingPayment,
            payment_type: PaymentType::OnlineGateway,
            subtotal: final_total,
            product_discount: dec!(0),
            shipping_discount: dec!(0),
            shipping_fee: dec!(0),
            final_total,
            recipient_name: "An".into(),
            recipient_phone: "0911111111".into(),
            shipping_address: "12 Hang Bai".into(),
            promotion_id: None,
            promotion_code: None,
            created_by: Uuid::new_v4(),
            approved_by: None,
            cancel_reason: None,
            payment_transaction_ref: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    fn signed_callback(verifier: &PaymentCallbackVerifier, pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        let mut raw = params(pairs);
        let signature = verifier.sign(&raw).unwrap();
        raw.insert("vnp_SecureHash".into(), signature);
        raw.insert("vnp_SecureHashType".into(), "HmacSHA512".into());
        raw
    }

    #[test]
    fn test_canonical_string_sorts_and_encodes() {
        assert_eq!(canonical_string(&params(&[("b", "2"), ("a", "1")])), "a=1&b=2");
        assert_eq!(
            canonical_string(&params(&[("vnp_OrderInfo", "Payment for order x/y")])),
            "vnp_OrderInfo=Payment+for+order+x%2Fy"
        );
    }

    #[test]
    fn test_signature_is_lowercase_hex_sha512() {
        let signature = verifier().sign(&params(&[("a", "1")])).unwrap();
        assert_eq!(signature.len(), 128);
        assert!(signature.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_signed_url_round_trips_through_verify() {
        let verifier = verifier();
        let raw = signed_callback(
            &verifier,
            &[
                ("vnp_ResponseCode", "00"),
                ("vnp_TransactionStatus", "00"),
                ("vnp_TxnRef", "abc"),
            ],
        );
        assert_eq!(verifier.verify(&raw), VerificationOutcome::PaymentSuccess);
    }

    #[test]
    fn test_tampered_value_is_rejected() {
        let verifier = verifier();
        let mut raw = signed_callback(
            &verifier,
            &[("vnp_Amount", "10000000"), ("vnp_ResponseCode", "00")],
        );
        raw.insert("vnp_Amount".into(), "100".into());
        assert_eq!(verifier.verify(&raw), VerificationOutcome::SignatureInvalid);
    }

    #[test]
    fn test_missing_or_garbled_signature_is_rejected() {
        let verifier = verifier();
        let mut raw = params(&[("vnp_ResponseCode", "00")]);
        assert_eq!(verifier.verify(&raw), VerificationOutcome::SignatureInvalid);
        raw.insert("vnp_SecureHash".into(), "not-hex".into());
        assert_eq!(verifier.verify(&raw), VerificationOutcome::SignatureInvalid);
    }

    #[test]
    fn test_non_success_code_is_payment_failure() {
        let verifier = verifier();
        let raw = signed_callback(&verifier, &[("vnp_ResponseCode", "24")]);
        assert_eq!(verifier.verify(&raw), VerificationOutcome::PaymentFailure);

        let raw = signed_callback(
            &verifier,
            &[("vnp_ResponseCode", "00"), ("vnp_TransactionStatus", "02")],
        );
        assert_eq!(verifier.verify(&raw), VerificationOutcome::PaymentFailure);
    }

    #[test]
    fn test_checkout_params_use_gateway_clock_and_minor_units() {
        let verifier = verifier();
        let order = order(dec!(1030000));
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 17, 30, 0).unwrap();
        let params = verifier
            .checkout_params(&order, "VND", "127.0.0.1", now)
            .unwrap();

        assert_eq!(params[PARAM_AMOUNT], "103000000");
        assert_eq!(params[PARAM_CREATE_DATE], "20240302003000");
        assert_eq!(params[PARAM_EXPIRE_DATE], "20240302004500");
        assert_eq!(params[PARAM_TXN_REF], order.id.simple().to_string());
        assert_eq!(
            params[PARAM_ORDER_INFO],
            format!("Payment for order {}", order.id)
        );
        assert_eq!(params[PARAM_MERCHANT_CODE], "DEMO0001");
    }

    #[test]
    fn test_payment_url_is_signed() {
        let verifier = verifier();
        let order = order(dec!(50000));
        let url = verifier
            .payment_url(&order, "VND", "10.0.0.1", Utc::now())
            .unwrap();
        assert!(url.starts_with("https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?vnp_Amount=5000000&"));
        assert!(url.contains("&vnp_SecureHash="));
    }

    #[test]
    fn test_callback_params_accessors() {
        let order_id = Uuid::new_v4();
        let info = format!("Payment for order {}", order_id);
        let raw = params(&[
            ("vnp_OrderInfo", info.as_str()),
            ("vnp_TxnRef", "ignored"),
            ("vnp_TransactionNo", "14226112"),
            ("vnp_Amount", "1999"),
        ]);
        let callback = CallbackParams::new(&raw);
        assert_eq!(callback.order_id().unwrap(), order_id);
        assert_eq!(callback.transaction_ref().unwrap(), "14226112");
        assert_eq!(callback.amount().unwrap(), dec!(19.99));

        let simple = order_id.simple().to_string();
        let raw = params(&[("vnp_TxnRef", simple.as_str()), ("vnp_TransactionNo", "")]);
        let callback = CallbackParams::new(&raw);
        assert_eq!(callback.order_id().unwrap(), order_id);
        assert_eq!(callback.transaction_ref().unwrap(), simple);
        assert_eq!(callback.callback_key().unwrap(), format!("{}:", simple));
    }

    #[test]
    fn test_callback_key_scopes_transaction_number_by_merchant_reference() {
        let first = params(&[("vnp_TxnRef", "aaa"), ("vnp_TransactionNo", "0")]);
        let second = params(&[("vnp_TxnRef", "bbb"), ("vnp_TransactionNo", "0")]);
        let first = CallbackParams::new(&first).callback_key().unwrap();
        let second = CallbackParams::new(&second).callback_key().unwrap();
        assert_eq!(first, "aaa:0");
        assert_ne!(first, second);

        let missing = params(&[("vnp_TransactionNo", "0")]);
        assert!(matches!(
            CallbackParams::new(&missing).callback_key(),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
