use duka_tools::payments::PaymentMethod;
use duka_tools::{with_retry, RailResponse, ToolError};

use crate::action::BotAction;

use super::{kes, slot_bool, slot_str, SubflowError, SubflowInput};

/// Payment flow: method discovery, amount confirmation, then exactly one
/// rail initiation. The amount is always echoed back and confirmed before
/// any money moves.
pub async fn run(input: &mut SubflowInput<'_>) -> Result<BotAction, SubflowError> {
    let methods = input.tools.payment_get_methods(&input.ctx)?;
    if methods.is_empty() {
        return Ok(BotAction::text(
            "Payments aren't set up on this chat yet — our team will confirm \
             payment details with you directly.",
        ));
    }

    let Some(amount) = payable_amount(input) else {
        return Ok(BotAction::text(
            "I don't see anything to pay for yet. Pick an item or share your \
             order number and we'll take it from there.",
        ));
    };

    // Step 1: confirm the amount.
    if !input.state.payment.amount_confirmed {
        let confirmed = slot_bool(input, "confirm").unwrap_or(false)
            || is_affirmative(input.message);
        if input.state.payment.amount_cents == Some(amount) && confirmed {
            input.state.payment.amount_confirmed = true;
        } else {
            input.state.payment.amount_cents = Some(amount);
            return Ok(BotAction::Buttons {
                body: format!("That's {} in total. Ready to pay?", kes(amount)),
                buttons: vec!["Yes, pay".to_string(), "Not yet".to_string()],
            });
        }
    }

    // Step 2: route to a rail.
    let method = chosen_method(input, &methods);
    let response = initiate(input, method, amount).await?;

    input.state.payment.payment_request_id = Some(response.payment_request_id.clone());
    input.state.payment.status = Some("initiated".to_string());
    input.state.payment.method = Some(format!("{:?}", method));

    let mut body = response.next_step.clone();
    if let Some(detail) = response.detail {
        body.push('\n');
        body.push_str(&detail);
    }
    Ok(BotAction::text(body))
}

async fn initiate(
    input: &mut SubflowInput<'_>,
    method: PaymentMethod,
    amount: i64,
) -> Result<RailResponse, SubflowError> {
    let tools = input.tools;
    let ctx = input.ctx.clone();
    let phone = input.customer.phone_e164.clone();

    let result = with_retry("payment_initiate", || {
        let ctx = ctx.clone();
        let phone = phone.clone();
        async move {
            match method {
                PaymentMethod::MpesaStkPush => {
                    tools.payment_initiate_stk_push(&ctx, &phone, amount).await
                }
                PaymentMethod::MpesaC2b => {
                    tools.payment_get_c2b_instructions(&ctx, &phone, amount).await
                }
                PaymentMethod::PesapalCheckout => {
                    tools.payment_create_pesapal_checkout(&ctx, &phone, amount).await
                }
            }
        }
    })
    .await;

    match result {
        Ok(resp) => Ok(resp),
        Err(ToolError::Retryable(reason)) => Err(SubflowError::Escalate {
            reason: format!("payment rail unavailable: {}", reason),
        }),
        Err(e) => Err(SubflowError::Tool(e)),
    }
}

/// Amount precedence: the draft order, then the cart, then an explicit slot.
fn payable_amount(input: &SubflowInput<'_>) -> Option<i64> {
    if let Some(total) = input.state.order_total_cents {
        return Some(total);
    }
    let cart_total = input.state.cart_total_cents();
    if cart_total > 0 {
        return Some(cart_total);
    }
    super::slot_i64(input, "amount_cents").filter(|a| *a > 0)
}

fn chosen_method(input: &SubflowInput<'_>, methods: &[PaymentMethod]) -> PaymentMethod {
    match slot_str(input, "method") {
        Some("c2b") | Some("paybill") => PaymentMethod::MpesaC2b,
        Some("card") | Some("pesapal") => PaymentMethod::PesapalCheckout,
        _ => *methods.first().unwrap_or(&PaymentMethod::MpesaStkPush),
    }
}

fn is_affirmative(message: &str) -> bool {
    let m = message.trim().to_lowercase();
    matches!(
        m.as_str(),
        "yes" | "yes, pay" | "yeah" | "sawa" | "ndio" | "ndiyo" | "pay" | "lipa" | "ok" | "okay"
    )
}
