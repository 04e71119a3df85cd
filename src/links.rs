//! Applying an assignment: tuning, opening and closing radio interfaces.
//!
//! Bring-up is all-or-nothing only in the aggregate: individual cards may
//! fail to open (the first failure is remembered and later reported to
//! Central), but a router with zero readable or zero writable interfaces
//! cannot do its job and tears everything down again.

use crate::error::InitError;
use crate::hw::{RadioCaps, RadioInterfaceInfo, RadioTransport, RadioType};
use crate::model::VehicleModel;

/// Outcome of opening the interfaces.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BringUpReport {
    pub opened_for_read: usize,
    pub opened_for_write: usize,
    /// First interface whose open failed, for the init-failure broadcast.
    pub failed_interface: Option<usize>,
    /// Enabled links whose assigned cards all failed to open.
    pub dead_links: Vec<usize>,
}

fn usable_assigned_link(card: &RadioInterfaceInfo, model: &VehicleModel) -> Option<usize> {
    let link = card.assigned_link?;
    let params = model.link(link)?;
    if params.is_disabled() || params.is_relay() {
        return None;
    }
    Some(link)
}

/// Tunes every assigned card to its link's frequency.
pub fn set_cards_frequencies<R: RadioTransport>(
    radio: &mut R,
    cards: &mut [RadioInterfaceInfo],
    model: &VehicleModel,
) {
    log::info!("tuning interfaces to their assigned links");
    for (i, card) in cards.iter_mut().enumerate() {
        card.current_frequency_khz = 0;
        if card.is_disabled() {
            continue;
        }
        let link = match card.assigned_link.and_then(|l| model.link(l)) {
            Some(l) => l,
            None => continue,
        };
        if !card.supports_frequency(link.frequency_khz) {
            continue;
        }
        match radio.set_frequency(i, link.frequency_khz) {
            Ok(()) => card.current_frequency_khz = link.frequency_khz,
            Err(e) => log::warn!("interface {} refused {} kHz: {}", i, link.frequency_khz, e),
        }
    }
}

/// Tunes every capable card to the single search frequency.
pub fn set_cards_frequencies_for_search<R: RadioTransport>(
    radio: &mut R,
    cards: &mut [RadioInterfaceInfo],
    search_frequency_khz: u32,
) {
    log::info!("tuning interfaces to search frequency {} kHz", search_frequency_khz);
    for (i, card) in cards.iter_mut().enumerate() {
        card.current_frequency_khz = 0;
        if card.is_disabled() || !card.supports_frequency(search_frequency_khz) {
            continue;
        }
        match radio.set_frequency(i, search_frequency_khz) {
            Ok(()) => card.current_frequency_khz = search_frequency_khz,
            Err(e) => log::warn!(
                "interface {} refused search frequency {} kHz: {}",
                i,
                search_frequency_khz,
                e
            ),
        }
    }
}

/// Opens the assigned interfaces for normal routing.
///
/// SiK radios open once for both directions; everything else opens
/// separately for read and write according to its capabilities. Atheros
/// cards get their TX data rate applied first.
pub fn open_interfaces<R: RadioTransport>(
    radio: &mut R,
    cards: &mut [RadioInterfaceInfo],
    model: &VehicleModel,
) -> Result<BringUpReport, InitError> {
    let mut report = BringUpReport::default();
    let mut read_per_link = vec![0usize; model.links.len()];
    let mut write_per_link = vec![0usize; model.links.len()];

    for (i, card) in cards.iter_mut().enumerate() {
        card.opened_for_read = false;
        card.opened_for_write = false;
        if card.is_disabled() {
            continue;
        }
        let link = match usable_assigned_link(card, model) {
            Some(l) => l,
            None => continue,
        };

        if card.radio_type == RadioType::Atheros {
            let rate = card
                .datarate_override_bps
                .unwrap_or(model.links[link].datarate_data_bps);
            radio.set_tx_datarate(i, rate);
        }

        let usable_for_traffic = card
            .caps
            .intersects(RadioCaps::CAN_USE_FOR_VIDEO | RadioCaps::CAN_USE_FOR_DATA);

        if card.caps.contains(RadioCaps::CAN_RX) && usable_for_traffic {
            if card.is_sik() {
                match radio.open_read_write(i) {
                    Ok(()) => {
                        card.opened_for_read = true;
                        card.opened_for_write = true;
                        read_per_link[link] += 1;
                        write_per_link[link] += 1;
                        report.opened_for_read += 1;
                        report.opened_for_write += 1;
                    }
                    Err(_) => {
                        report.failed_interface.get_or_insert(i);
                    }
                }
            } else {
                match radio.open_for_read(i) {
                    Ok(()) => {
                        card.opened_for_read = true;
                        read_per_link[link] += 1;
                        report.opened_for_read += 1;
                        log::info!("opened interface {} ({}) for read", i, card.name);
                    }
                    Err(_) => {
                        report.failed_interface.get_or_insert(i);
                    }
                }
            }
        }

        if card.caps.contains(RadioCaps::CAN_TX) && usable_for_traffic && !card.is_sik() {
            match radio.open_for_write(i) {
                Ok(()) => {
                    card.opened_for_write = true;
                    write_per_link[link] += 1;
                    report.opened_for_write += 1;
                    log::info!("opened interface {} ({}) for write", i, card.name);
                }
                Err(_) => {
                    report.failed_interface.get_or_insert(i);
                }
            }
        }
    }

    log::info!(
        "bring-up: {} interfaces readable, {} writable",
        report.opened_for_read,
        report.opened_for_write
    );

    if report.opened_for_read == 0 {
        log::error!("no interface could be opened for receiving");
        close_interfaces(radio, cards);
        return Err(InitError::NoRxInterfaces);
    }
    if report.opened_for_write == 0 {
        log::error!("no interface could be opened for transmitting");
        close_interfaces(radio, cards);
        return Err(InitError::NoTxInterfaces);
    }

    for (k, params) in model.links.iter().enumerate() {
        if params.is_disabled() || params.is_relay() {
            continue;
        }
        if read_per_link[k] == 0 {
            log::error!("link {} has no readable interface", k);
        }
        if write_per_link[k] == 0 {
            log::error!("link {} has no writable interface", k);
        }
        if read_per_link[k] == 0 && write_per_link[k] == 0 {
            report.dead_links.push(k);
        }
    }

    Ok(report)
}

/// Opens interfaces for vehicle search: read-only listening on one
/// frequency, no assignment.
pub fn open_interfaces_for_search<R: RadioTransport>(
    radio: &mut R,
    cards: &mut [RadioInterfaceInfo],
    search_frequency_khz: u32,
) -> BringUpReport {
    log::info!("opening interfaces for search at {} kHz", search_frequency_khz);
    let mut report = BringUpReport::default();

    for (i, card) in cards.iter_mut().enumerate() {
        card.opened_for_read = false;
        card.opened_for_write = false;
        if card.is_disabled() || !card.supports_frequency(search_frequency_khz) {
            continue;
        }
        if !card.caps.contains(RadioCaps::CAN_RX)
            || !card.caps.contains(RadioCaps::CAN_USE_FOR_DATA)
        {
            continue;
        }

        if card.is_sik() {
            match radio.open_read_write(i) {
                Ok(()) => {
                    card.opened_for_read = true;
                    card.opened_for_write = true;
                    report.opened_for_read += 1;
                    report.opened_for_write += 1;
                }
                Err(_) => {
                    report.failed_interface.get_or_insert(i);
                }
            }
        } else {
            match radio.open_for_read(i) {
                Ok(()) => {
                    card.opened_for_read = true;
                    report.opened_for_read += 1;
                    log::info!("opened interface {} ({}) for search", i, card.name);
                }
                Err(_) => {
                    report.failed_interface.get_or_insert(i);
                }
            }
        }
    }

    log::info!("search bring-up: {} interfaces listening", report.opened_for_read);
    report
}

/// Closes every interface and clears the open flags.
pub fn close_interfaces<R: RadioTransport>(radio: &mut R, cards: &mut [RadioInterfaceInfo]) {
    log::info!("closing all radio interfaces");
    for (i, card) in cards.iter_mut().enumerate() {
        if card.opened_for_read || card.opened_for_write {
            radio.close(i);
        }
        card.opened_for_read = false;
        card.opened_for_write = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::SimRadio;
    use crate::model::test_support::{basic_model, data_link};

    const F58: u32 = 5_745_000;

    fn cards() -> Vec<RadioInterfaceInfo> {
        let caps = RadioCaps::CAN_RX
            | RadioCaps::CAN_TX
            | RadioCaps::CAN_USE_FOR_DATA
            | RadioCaps::CAN_USE_FOR_VIDEO;
        vec![
            RadioInterfaceInfo::new("m0", "wlan0", RadioType::Atheros, caps, vec![F58]),
            RadioInterfaceInfo::new("m1", "wlan1", RadioType::Realtek, caps, vec![F58]),
        ]
    }

    #[test]
    fn normal_bring_up_opens_read_and_write() {
        let model = basic_model(vec![data_link(F58)]);
        let mut cards = cards();
        cards[0].assigned_link = Some(0);
        cards[1].assigned_link = Some(0);
        let mut radio = SimRadio::new(2);

        set_cards_frequencies(&mut radio, &mut cards, &model);
        assert_eq!(radio.frequency(0), F58);
        assert_eq!(cards[1].current_frequency_khz, F58);

        let report = open_interfaces(&mut radio, &mut cards, &model).unwrap();
        assert_eq!(report.opened_for_read, 2);
        assert_eq!(report.opened_for_write, 2);
        assert_eq!(report.failed_interface, None);
        assert!(report.dead_links.is_empty());
        assert!(cards.iter().all(|c| c.opened_for_read && c.opened_for_write));
    }

    #[test]
    fn sik_card_opens_once_for_both_directions() {
        let model = basic_model(vec![data_link(F58)]);
        let mut cards = cards();
        cards[0].radio_type = RadioType::SiK;
        cards[0].assigned_link = Some(0);
        cards[1].assigned_link = Some(0);
        let mut radio = SimRadio::new(2);

        let report = open_interfaces(&mut radio, &mut cards, &model).unwrap();
        assert!(cards[0].opened_for_read && cards[0].opened_for_write);
        assert_eq!(report.opened_for_read, 2);
        assert_eq!(report.opened_for_write, 2);
    }

    #[test]
    fn failed_card_is_remembered_but_not_fatal() {
        let model = basic_model(vec![data_link(F58)]);
        let mut cards = cards();
        cards[0].assigned_link = Some(0);
        cards[1].assigned_link = Some(0);
        let mut radio = SimRadio::new(2);
        radio.fail_interface(0);

        let report = open_interfaces(&mut radio, &mut cards, &model).unwrap();
        assert_eq!(report.failed_interface, Some(0));
        assert_eq!(report.opened_for_read, 1);
        assert!(!cards[0].opened_for_read);
        assert!(cards[1].opened_for_read);
    }

    #[test]
    fn all_cards_failing_is_fatal_and_closes_everything() {
        let model = basic_model(vec![data_link(F58)]);
        let mut cards = cards();
        cards[0].assigned_link = Some(0);
        cards[1].assigned_link = Some(0);
        let mut radio = SimRadio::new(2);
        radio.fail_interface(0);
        radio.fail_interface(1);

        let err = open_interfaces(&mut radio, &mut cards, &model).unwrap_err();
        assert_eq!(err, InitError::NoRxInterfaces);
        assert!(cards.iter().all(|c| !c.opened_for_read && !c.opened_for_write));
    }

    #[test]
    fn search_opens_read_only_on_capable_cards() {
        let mut cards = cards();
        cards[1].caps.remove(RadioCaps::CAN_USE_FOR_DATA);
        let mut radio = SimRadio::new(2);

        set_cards_frequencies_for_search(&mut radio, &mut cards, F58);
        let report = open_interfaces_for_search(&mut radio, &mut cards, F58);

        assert_eq!(report.opened_for_read, 1);
        assert!(cards[0].opened_for_read);
        assert!(!cards[0].opened_for_write);
        assert!(!cards[1].opened_for_read);
    }

    #[test]
    fn unassigned_cards_stay_closed() {
        let model = basic_model(vec![data_link(F58)]);
        let mut cards = cards();
        cards[0].assigned_link = Some(0);
        let mut radio = SimRadio::new(2);

        let report = open_interfaces(&mut radio, &mut cards, &model).unwrap();
        assert_eq!(report.opened_for_read, 1);
        assert!(!cards[1].opened_for_read);
        assert!(!cards[1].opened_for_write);
    }
}
