use crate::config::ShippingProviderConfig;
use crate::errors::ServiceError;
use crate::services::checkout::Address;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// A normalized shipping rate offer. Cached on the cart as JSON so the
/// selection step can be validated against exactly what was shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateOffer {
    pub provider: String,
    pub service_code: String,
    pub service_name: String,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
}

/// Synthetic provider id for the configured flat-rate fallback.
pub const FLAT_RATE_PROVIDER: &str = "flat_rate";

/// Client for the carrier aggregator. Quoting is a two-step protocol: create
/// a quote request, then poll for offers until the deadline. Every failure
/// mode degrades to the flat-rate fallback; quoting never fails checkout.
#[derive(Clone)]
pub struct ShippingRateService {
    http: reqwest::Client,
    config: ShippingProviderConfig,
}

impl ShippingRateService {
    pub fn new(config: ShippingProviderConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client init failed: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Quotes rates for a parcel to the destination. Returns at least one
    /// offer; when the aggregator is unconfigured, unreachable, or yields
    /// nothing before the polling deadline, that one offer is the flat rate.
    #[instrument(skip(self, destination), fields(country = %destination.country))]
    pub async fn quote(
        &self,
        parcel_weight_kg: Decimal,
        item_count: i32,
        declared_value: Decimal,
        destination: &Address,
    ) -> Result<Vec<RateOffer>, ServiceError> {
        if self.config.base_url.is_empty() {
            debug!("Shipping aggregator not configured; using flat rate");
            return Ok(vec![self.flat_rate_offer()]);
        }

        let quote_id = match self
            .create_quote(parcel_weight_kg, item_count, declared_value, destination)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!("Shipping quote creation failed, falling back to flat rate: {}", err);
                return Ok(vec![self.flat_rate_offer()]);
            }
        };

        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.poll_deadline_ms);
        loop {
            match self.fetch_offers(&quote_id).await {
                Ok(offers) if !offers.is_empty() => return Ok(offers),
                Ok(_) => debug!(quote_id = %quote_id, "No offers yet"),
                Err(err) => warn!(quote_id = %quote_id, "Offer poll failed: {}", err),
            }
            if Instant::now() + interval >= deadline {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        warn!(quote_id = %quote_id, "No offers before deadline; falling back to flat rate");
        Ok(vec![self.flat_rate_offer()])
    }

    async fn create_quote(
        &self,
        parcel_weight_kg: Decimal,
        item_count: i32,
        declared_value: Decimal,
        destination: &Address,
    ) -> Result<String, ServiceError> {
        let body = quote_request_body(
            &self.config,
            parcel_weight_kg,
            item_count,
            declared_value,
            destination,
        );

        let response = self
            .http
            .post(format!("{}/quotes", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderUnavailable(format!("quote request: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ProviderError(format!(
                "quote request returned {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("quote response body: {}", e)))?;
        payload
            .pointer("/data/id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                ServiceError::ProviderError("quote response missing data.id".to_string())
            })
    }

    async fn fetch_offers(&self, quote_id: &str) -> Result<Vec<RateOffer>, ServiceError> {
        let response = self
            .http
            .get(format!("{}/quotes/{}/offers", self.config.base_url, quote_id))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderUnavailable(format!("offer poll: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ProviderError(format!(
                "offer poll returned {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("offer response body: {}", e)))?;
        Ok(normalize_offers(&payload))
    }

    fn flat_rate_offer(&self) -> RateOffer {
        RateOffer {
            provider: FLAT_RATE_PROVIDER.to_string(),
            service_code: FLAT_RATE_PROVIDER.to_string(),
            service_name: self.config.flat_rate_name.clone(),
            amount: self.config.flat_rate_amount,
            eta: None,
        }
    }
}

/// Request body for the create-quote call. The declared value is the cart's
/// subtotal, carried for customs and insurance purposes.
fn quote_request_body(
    config: &ShippingProviderConfig,
    parcel_weight_kg: Decimal,
    item_count: i32,
    declared_value: Decimal,
    destination: &Address,
) -> Value {
    json!({
        "sender": {
            "name": config.sender_name,
            "country": config.sender_country,
            "city": config.sender_city,
            "address": config.sender_line1,
            "postalCode": config.sender_postal_code,
        },
        "recipient": {
            "name": destination.name,
            "country": destination.country,
            "city": destination.city,
            "district": destination.district,
            "address": destination.line1,
            "postalCode": destination.postal_code,
        },
        "parcel": {
            "weightKg": parcel_weight_kg,
            "itemCount": item_count,
            "declaredValue": declared_value,
        },
    })
}

/// Normalizes the aggregator's offer list. Offers without a usable positive
/// amount are dropped; the display name is "provider • ETA" when an ETA is
/// present. When the full list yields nothing, the provider's own "cheapest"
/// offer is tried before giving up.
fn normalize_offers(payload: &Value) -> Vec<RateOffer> {
    let offers: Vec<RateOffer> = payload
        .pointer("/data")
        .and_then(Value::as_array)
        .map(|raw| raw.iter().filter_map(normalize_offer).collect())
        .unwrap_or_default();
    if !offers.is_empty() {
        return offers;
    }

    payload
        .get("cheapest")
        .or_else(|| payload.pointer("/meta/cheapest"))
        .and_then(normalize_offer)
        .map(|offer| vec![offer])
        .unwrap_or_default()
}

fn normalize_offer(offer: &Value) -> Option<RateOffer> {
    let amount = extract_amount(offer)?;
    let provider = offer
        .get("providerCode")
        .or_else(|| offer.get("provider"))
        .and_then(Value::as_str)?
        .to_string();
    let service_code = offer
        .get("providerServiceCode")
        .or_else(|| offer.get("serviceCode"))
        .or_else(|| offer.get("id"))
        .and_then(Value::as_str)?
        .to_string();
    let eta = offer
        .get("averageEstimatedTime")
        .or_else(|| offer.get("eta"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let service_name = match &eta {
        Some(eta) => format!("{} • {}", provider, eta),
        None => provider.clone(),
    };

    Some(RateOffer {
        provider,
        service_code,
        service_name,
        amount,
        eta,
    })
}

/// Picks the offer amount from the first populated candidate field; amounts
/// arrive as numbers or numeric strings depending on the carrier. Only
/// strictly positive amounts count.
fn extract_amount(offer: &Value) -> Option<Decimal> {
    for key in ["totalAmount", "amount", "price"] {
        let Some(value) = offer.get(key) else {
            continue;
        };
        let parsed = match value {
            Value::String(s) => s.trim().parse::<Decimal>().ok(),
            Value::Number(n) => n
                .as_f64()
                .and_then(Decimal::from_f64)
                .map(|d| d.round_dp(4)),
            _ => None,
        };
        match parsed {
            Some(amount) if amount > Decimal::ZERO => return Some(amount),
            _ => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn normalizes_offers_with_name_and_eta() {
        let payload = json!({
            "data": [
                {
                    "providerCode": "fastship",
                    "providerServiceCode": "fastship-express",
                    "totalAmount": "24.90",
                    "averageEstimatedTime": "1-2 days"
                },
                {
                    "provider": "econo",
                    "serviceCode": "econo-ground",
                    "amount": 9.5
                }
            ]
        });

        let offers = normalize_offers(&payload);
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].service_name, "fastship • 1-2 days");
        assert_eq!(offers[0].amount, dec!(24.90));
        assert_eq!(offers[1].service_name, "econo");
        assert_eq!(offers[1].amount, dec!(9.5));
    }

    #[test]
    fn drops_offers_without_positive_amount() {
        let payload = json!({
            "data": [
                { "providerCode": "a", "providerServiceCode": "a-1", "totalAmount": "0" },
                { "providerCode": "b", "providerServiceCode": "b-1", "amount": -3 },
                { "providerCode": "c", "providerServiceCode": "c-1" }
            ]
        });
        assert!(normalize_offers(&payload).is_empty());
    }

    #[test]
    fn amount_field_priority_is_total_then_amount_then_price() {
        let payload = json!({
            "data": [{
                "providerCode": "x",
                "providerServiceCode": "x-1",
                "totalAmount": "12.00",
                "amount": "99.00",
                "price": "1.00"
            }]
        });
        let offers = normalize_offers(&payload);
        assert_eq!(offers[0].amount, dec!(12.00));
    }

    #[test]
    fn unparseable_amount_falls_through_to_next_field() {
        let payload = json!({
            "data": [{
                "providerCode": "x",
                "providerServiceCode": "x-1",
                "totalAmount": "n/a",
                "amount": "7.50"
            }]
        });
        let offers = normalize_offers(&payload);
        assert_eq!(offers[0].amount, dec!(7.50));
    }

    #[test]
    fn missing_data_array_yields_no_offers() {
        assert!(normalize_offers(&json!({})).is_empty());
        assert!(normalize_offers(&json!({"data": null})).is_empty());
    }

    #[test]
    fn cheapest_offer_backstops_an_empty_list() {
        let payload = json!({
            "data": [],
            "cheapest": {
                "providerCode": "econo",
                "providerServiceCode": "econo-ground",
                "totalAmount": "6.40"
            }
        });
        let offers = normalize_offers(&payload);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].provider, "econo");
        assert_eq!(offers[0].amount, dec!(6.40));

        // A populated list wins over the cheapest field
        let payload = json!({
            "data": [{ "providerCode": "fast", "providerServiceCode": "fast-1", "amount": 12 }],
            "cheapest": { "providerCode": "econo", "providerServiceCode": "econo-1", "amount": 6 }
        });
        let offers = normalize_offers(&payload);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].provider, "fast");
    }

    #[test]
    fn quote_request_declares_the_cart_value() {
        let config = ShippingProviderConfig::default();
        let destination = Address {
            name: "Robin Vale".into(),
            phone: None,
            country: "US".into(),
            city: "Austin".into(),
            district: None,
            postal_code: Some("78701".into()),
            line1: "12 Oak Ave".into(),
            line2: None,
        };
        let body = quote_request_body(&config, dec!(1.5), 3, dec!(240.00), &destination);
        assert_eq!(body["parcel"]["declaredValue"], json!(dec!(240.00)));
        assert_eq!(body["parcel"]["itemCount"], 3);
        assert_eq!(body["recipient"]["country"], "US");
    }
}
