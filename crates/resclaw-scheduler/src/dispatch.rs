//! The dispatch routine — runs once when a slot's timer fires.
//!
//! Each step is fault-isolated: a customer whose send fails is logged and
//! skipped, never aborting the rest of the batch. The slot is marked
//! processed exactly once, after every eligible customer has been attempted.

use std::sync::Arc;

use resclaw_core::types::{Customer, ReservationSlot};
use resclaw_db::ReservationDb;
use resclaw_uipath::UiPathClient;

/// Process one reservation slot: load OPEN customers in its area, record an
/// attempt and send a request for each, then mark the slot processed.
///
/// Safe to invoke for a deleted or already-processed slot — both are logged
/// no-ops, which guards against races between cancellation/deletion and a
/// timer that already fired.
pub async fn process_slot(
    db: &Arc<ReservationDb>,
    client: &Arc<UiPathClient>,
    slot_id: i64,
) -> Result<(), String> {
    let slot = match db.get_slot(slot_id)? {
        Some(s) => s,
        None => {
            tracing::error!("Reservation slot {slot_id} not found — skipping dispatch");
            return Ok(());
        }
    };
    if slot.is_processed {
        tracing::warn!("Reservation slot {slot_id} already processed — skipping dispatch");
        return Ok(());
    }

    let area = match db.get_area(slot.area_id)? {
        Some(a) => a,
        None => {
            return Err(format!(
                "area {} for slot {slot_id} not found",
                slot.area_id
            ));
        }
    };

    let customers = db.open_customers_in_area(slot.area_id)?;
    tracing::info!(
        "Processing {} customer(s) for slot {slot_id} (area: {})",
        customers.len(),
        area.name
    );

    for customer in &customers {
        if let Err(e) = send_for_customer(db, client, customer, &slot, &area.name).await {
            tracing::error!(
                "Reservation request for customer {} (slot {slot_id}) failed: {e}",
                customer.id
            );
        }
    }

    // Marked after the whole batch ran, even when individual sends failed.
    // Customers that turn OPEN later are not retroactively dispatched.
    db.mark_slot_processed(slot.id)?;
    tracing::info!("Completed processing reservation slot {slot_id}");
    Ok(())
}

/// Record the outbound attempt and send the request for a single customer.
async fn send_for_customer(
    db: &Arc<ReservationDb>,
    client: &Arc<UiPathClient>,
    customer: &Customer,
    slot: &ReservationSlot,
    area_name: &str,
) -> Result<(), String> {
    let payload = serde_json::json!({
        "national_id": customer.national_id,
        "phone_number": customer.phone_number,
        "area": area_name,
    });
    let attempt = db.create_attempt(customer.id, slot.id, &payload)?;

    let outcome = client
        .send_reservation(&customer.national_id, &customer.phone_number, area_name, None)
        .await;

    if outcome.ok {
        // Transport-level acknowledgement only — the authoritative status
        // arrives later via the external callback.
        db.set_attempt_ack(attempt.id, &outcome.data)?;
        tracing::info!(
            "Sent reservation request for customer {} (national_id: {})",
            customer.id,
            customer.national_id
        );
    } else {
        tracing::warn!(
            "Reservation send for customer {} rejected: {} {}",
            customer.id,
            outcome.code,
            outcome.message
        );
    }
    Ok(())
}
