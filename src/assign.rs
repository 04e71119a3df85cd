//! Radio interface to link assignment.
//!
//! Given the controller's cards and the vehicle's logical links, decide
//! which card serves which link. The planner is a pure function so every
//! policy detail is unit-testable; applying the plan (tuning, opening) is
//! [`links`](crate::links)' job.
//!
//! Policy, in order:
//!
//! 1. Cards that can only serve one link get that link.
//! 2. The user-pinned main connect link gets at least one of the remaining
//!    cards if any supports it.
//! 3. Remaining multi-link cards round-robin across the links, so several
//!    flexible cards spread out instead of piling onto link 0.
//!
//! Links that end up with no card are reported so the caller can raise an
//! alarm per link.

use crate::hw::{RadioCaps, RadioInterfaceInfo, MAX_RADIO_INTERFACES};
use crate::model::VehicleModel;

/// Result of one planning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentPlan {
    /// Assigned link per card, indexed like the inventory.
    pub iface_link: Vec<Option<usize>>,
    /// Whether each link got at least one card.
    pub link_assigned: Vec<bool>,
    /// Usable links that got no card; each becomes an alarm.
    pub unserved_links: Vec<usize>,
}

impl AssignmentPlan {
    fn empty(cards: usize, links: usize) -> Self {
        AssignmentPlan {
            iface_link: vec![None; cards],
            link_assigned: vec![false; links],
            unserved_links: Vec::new(),
        }
    }
}

/// Whether the controller can serve `link` at all, ignoring frequencies.
fn link_is_usable(model: &VehicleModel, link: usize) -> bool {
    let params = &model.links[link];
    if params.is_disabled() {
        return false;
    }
    if params.is_relay() {
        return false;
    }
    // Relay links are filtered again on 4.5+ vehicle firmware.
    if model.sw_version_major() >= 45 && params.is_relay() {
        return false;
    }
    true
}

/// Whether `card` can serve `link`, considering direction and frequency.
fn card_supports_link(card: &RadioInterfaceInfo, model: &VehicleModel, link: usize) -> bool {
    let params = &model.links[link];

    // Uplink-only link needs a card that can transmit.
    if params.caps.contains(RadioCaps::CAN_RX)
        && !params.caps.contains(RadioCaps::CAN_TX)
        && !card.caps.contains(RadioCaps::CAN_TX)
    {
        return false;
    }

    // Downlink-only link needs a card that can receive.
    if !params.caps.contains(RadioCaps::CAN_RX)
        && params.caps.contains(RadioCaps::CAN_TX)
        && !card.caps.contains(RadioCaps::CAN_RX)
    {
        return false;
    }

    card.supports_frequency(params.frequency_khz)
}

/// Computes the card-to-link assignment for the current vehicle.
///
/// `stored_main_frequency_khz` is the user-pinned main connect frequency,
/// 0 when none was stored for this vehicle.
pub fn plan_assignment(
    cards: &[RadioInterfaceInfo],
    model: &VehicleModel,
    stored_main_frequency_khz: u32,
) -> AssignmentPlan {
    let mut plan = AssignmentPlan::empty(cards.len(), model.links.len());

    let mut usable_count = 0;
    let mut last_usable_link = 0;
    let mut last_usable_frequency = 0;
    let mut main_link = None;

    for (k, params) in model.links.iter().enumerate() {
        if !link_is_usable(model, k) {
            continue;
        }
        usable_count += 1;
        last_usable_link = k;
        last_usable_frequency = params.frequency_khz;
        if params.frequency_khz == stored_main_frequency_khz {
            main_link = Some(k);
        }
    }

    if usable_count == 0 {
        log::error!(
            "vehicle has no usable radio links (out of {})",
            model.links.len()
        );
        return plan;
    }

    // One usable link: every enabled card that can tune to it serves it.
    if usable_count == 1 {
        let k = last_usable_link;
        log::info!(
            "assigning all capable interfaces to the single usable link {} ({} kHz)",
            k,
            last_usable_frequency
        );
        let mut assigned = 0;
        for (i, card) in cards.iter().enumerate() {
            if card.is_disabled() || !card.supports_frequency(last_usable_frequency) {
                continue;
            }
            plan.iface_link[i] = Some(k);
            assigned += 1;
            log::info!("  interface {} ({}) -> link {}", i, card.name, k);
        }
        plan.link_assigned[k] = assigned > 0;
        if assigned == 0 {
            plan.unserved_links.push(k);
        }
        return plan;
    }

    // No stored main frequency: treat the last usable link's frequency as
    // the main one for capability purposes. The dedicated main-link pass
    // below still only runs off a real stored match.
    let effective_main_frequency = if stored_main_frequency_khz == 0 {
        last_usable_frequency
    } else {
        stored_main_frequency_khz
    };

    // A vehicle exposes at most as many links as the controller has
    // interface slots.
    let link_count = model.links.len().min(MAX_RADIO_INTERFACES);

    let mut supports = vec![[false; MAX_RADIO_INTERFACES]; cards.len()];
    let mut supports_main = vec![false; cards.len()];
    let mut supported_count = vec![0usize; cards.len()];
    let mut single_link = vec![None; cards.len()];

    for (i, card) in cards.iter().enumerate() {
        if card.is_disabled() {
            continue;
        }
        for k in 0..link_count {
            if !link_is_usable(model, k) || !card_supports_link(card, model, k) {
                continue;
            }
            supports[i][k] = true;
            supported_count[i] += 1;
            single_link[i] = Some(k);
            if model.links[k].frequency_khz == effective_main_frequency {
                supports_main[i] = true;
            }
        }
    }

    // Pass A: cards that can only serve one link.
    for (i, card) in cards.iter().enumerate() {
        if card.is_disabled() || supported_count[i] != 1 {
            continue;
        }
        let k = match single_link[i] {
            Some(k) => k,
            None => continue,
        };
        plan.iface_link[i] = Some(k);
        plan.link_assigned[k] = true;
        log::info!("  A) interface {} ({}) -> link {}", i, card.name, k);
    }

    // Pass B: make sure the main connect link has a card.
    if let Some(k) = main_link {
        for (i, card) in cards.iter().enumerate() {
            if card.is_disabled() || plan.iface_link[i].is_some() || !supports_main[i] {
                continue;
            }
            plan.iface_link[i] = Some(k);
            plan.link_assigned[k] = true;
            log::info!("  B) interface {} ({}) -> main connect link {}", i, card.name, k);
            break;
        }
    }

    // Pass C: spread the remaining flexible cards round-robin. The cursor
    // deliberately advances across cards so consecutive cards land on
    // different links.
    let mut cursor = 0;
    for (i, card) in cards.iter().enumerate() {
        if card.is_disabled() || supported_count[i] < 2 || plan.iface_link[i].is_some() {
            continue;
        }
        let mut tries = 0;
        while plan.iface_link[i].is_none() && tries <= MAX_RADIO_INTERFACES {
            if supports[i][cursor] {
                plan.iface_link[i] = Some(cursor);
                plan.link_assigned[cursor] = true;
                log::info!("  C) interface {} ({}) -> link {}", i, card.name, cursor);
            }
            tries += 1;
            cursor += 1;
            if cursor >= link_count {
                cursor = 0;
            }
        }
    }

    for k in 0..model.links.len() {
        if link_is_usable(model, k) && !plan.link_assigned[k] {
            log::warn!("no radio interface could be assigned to link {}", k);
            plan.unserved_links.push(k);
        }
    }

    plan
}
