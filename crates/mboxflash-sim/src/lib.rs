//! mboxflash-sim - Simulated debug target for testing
//!
//! This crate provides a debug target that lives entirely in memory: RAM,
//! a NOR flash array, a scratch allocator, and an emulated loader that
//! services the mailbox exactly as the real one does. It's useful for
//! testing and development without real hardware.
//!
//! Commands can be made to stall or fail, and memory writes can be made to
//! fault, so every error path of the driver can be exercised.

pub mod clock;
pub mod error;
pub mod target;

pub use clock::SimClock;
pub use error::SimError;
pub use target::{CommandRecord, SimConfig, SimTarget};

/// Placeholder loader image accepted by the simulated target
///
/// The emulated loader does not execute it; only its size and placement
/// matter.
pub fn stub_loader() -> Vec<u8> {
    (0..0x100u32).map(|i| i as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mboxflash_core::driver::{FlashDriver, FlashDriverExt, LoaderFlash};
    use mboxflash_core::geometry::{EraseState, FlashBank};
    use mboxflash_core::loader::LoaderImage;
    use mboxflash_core::mailbox::{Command, MailboxLayout};
    use mboxflash_core::session::{Mailbox, Timeouts};
    use mboxflash_core::target::{TargetError, TargetState};
    use mboxflash_core::Error;
    use std::cell::Cell;
    use std::rc::Rc;

    type SimDriver = LoaderFlash<SimTarget, SimClock>;

    fn setup_with(config: SimConfig) -> SimDriver {
        let _ = env_logger::builder().is_test(true).try_init();

        let target = SimTarget::new(config.clone()).unwrap();
        let clock = target.clock();
        let loader = LoaderImage::with_default_placement(stub_loader()).unwrap();
        let layout = MailboxLayout::new(config.mailbox_base);
        let mailbox = Mailbox::new(target, clock, layout, loader);
        let bank =
            FlashBank::new(config.flash_base, config.flash_size, Some(config.sector_size)).unwrap();
        LoaderFlash::new(mailbox, bank)
    }

    fn setup() -> SimDriver {
        setup_with(SimConfig::default())
    }

    fn target(driver: &SimDriver) -> &SimTarget {
        driver.mailbox().target()
    }

    fn target_mut(driver: &mut SimDriver) -> &mut SimTarget {
        driver.mailbox_mut().target_mut()
    }

    fn issued(driver: &SimDriver, command: Command) -> Vec<CommandRecord> {
        target(driver)
            .commands()
            .iter()
            .filter(|r| r.command == command)
            .copied()
            .collect()
    }

    fn assert_torn_down(driver: &SimDriver) {
        assert!(driver.mailbox().scratch().is_none());
        assert!(target(driver).scratch().is_none());
        assert_eq!(target(driver).run_state(), TargetState::Halted);
    }

    #[test]
    fn test_probe_identifies_known_device() {
        let mut driver = setup();
        assert_eq!(driver.describe(), "unknown");
        assert!(!driver.is_probed());

        driver.probe().unwrap();

        assert!(driver.is_probed());
        assert_eq!(driver.device_type().map(|t| t.0), Some(0x0117_0117));
        assert_eq!(driver.describe(), "Spansion NOR 0x01 0x17");
        assert_eq!(issued(&driver, Command::ReadFlashId).len(), 1);
        assert_torn_down(&driver);
    }

    #[test]
    fn test_probe_uploads_and_starts_loader() {
        let mut driver = setup();
        driver.probe().unwrap();

        let code = stub_loader();
        assert_eq!(
            target(&driver).ram_at(0x1C00_0000, code.len()),
            Some(&code[..])
        );
        assert_eq!(target(&driver).entry(), Some(0x1C00_0080));
    }

    #[test]
    fn test_probe_unrecognized_device_is_not_fatal() {
        let mut config = SimConfig::default();
        config.set_option("id", "ef4018").unwrap();
        let mut driver = setup_with(config);

        driver.probe().unwrap();
        assert_eq!(driver.device_type().map(|t| t.0), Some(0xEF40_1800));
        assert_eq!(driver.describe(), "unrecognized");
    }

    #[test]
    fn test_probe_is_sticky_until_reset() {
        let mut driver = setup();
        let mut buf = [0u8; 16];
        driver.read(&mut buf, 0).unwrap();
        driver.read(&mut buf, 16).unwrap();
        assert_eq!(issued(&driver, Command::ReadFlashId).len(), 1);

        driver.reset();
        assert!(!driver.is_probed());
        assert_eq!(driver.describe(), "unknown");
        driver.read(&mut buf, 0).unwrap();
        assert_eq!(issued(&driver, Command::ReadFlashId).len(), 2);
    }

    #[test]
    fn test_probe_rebuilds_sector_table() {
        let mut driver = setup();
        driver.mass_erase().unwrap();
        assert!(driver
            .bank()
            .sectors()
            .iter()
            .all(|s| s.erase_state == EraseState::Erased));

        driver.probe().unwrap();
        assert!(driver
            .bank()
            .sectors()
            .iter()
            .all(|s| s.erase_state == EraseState::Unknown));
    }

    #[test]
    fn test_reconfigure_forces_probe() {
        let mut driver = setup();
        driver.probe().unwrap();

        driver.reconfigure(FlashBank::new(0, 32 * 1024, Some(4096)).unwrap());
        assert!(!driver.is_probed());
        assert_eq!(driver.bank().sector_count(), 8);

        driver.blank_check().unwrap();
        assert_eq!(issued(&driver, Command::ReadFlashId).len(), 2);
    }

    #[test]
    fn test_chunked_write_issues_one_cycle_per_window() {
        let mut driver = setup();
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();

        driver.write(&data, 0x100).unwrap();

        let writes = issued(&driver, Command::WritePage);
        assert_eq!(writes.len(), 4);
        let sizes: Vec<u32> = writes.iter().map(|r| r.size).collect();
        assert_eq!(sizes, vec![256, 256, 256, 232]);
        assert_eq!(sizes.iter().sum::<u32>(), 1000);
        let addresses: Vec<u32> = writes.iter().map(|r| r.address).collect();
        assert_eq!(addresses, vec![0x100, 0x200, 0x300, 0x400]);
        assert_eq!(&target(&driver).flash()[0x100..0x100 + 1000], &data[..]);
        assert_torn_down(&driver);
    }

    #[test]
    fn test_exact_window_multiples_have_no_trailing_cycle() {
        for (len, cycles) in [(256usize, 1usize), (512, 2)] {
            let mut driver = setup();
            driver.write(&vec![0xA5; len], 0).unwrap();

            let writes = issued(&driver, Command::WritePage);
            assert_eq!(writes.len(), cycles, "{} bytes", len);
            assert!(writes.iter().all(|r| r.size == 256));

            let mut buf = vec![0u8; len];
            driver.read(&mut buf, 0).unwrap();
            assert_eq!(issued(&driver, Command::ReadPage).len(), cycles);
            assert!(buf.iter().all(|&b| b == 0xA5));
        }
    }

    #[test]
    fn test_bank_ending_at_top_of_address_space() {
        let config = SimConfig {
            flash_base: 0xFFFF_0000,
            ..SimConfig::default()
        };
        let mut driver = setup_with(config);

        driver.write(&[0x3C; 16], 0xFFF0).unwrap();
        assert_torn_down(&driver);
        let mut buf = [0u8; 16];
        driver.read(&mut buf, 0xFFF0).unwrap();
        assert_torn_down(&driver);

        assert_eq!(buf, [0x3C; 16]);
        assert_eq!(issued(&driver, Command::WritePage)[0].address, 0xFFFF_FFF0);
        assert_eq!(issued(&driver, Command::ReadPage)[0].address, 0xFFFF_FFF0);

        // Multiple chunks up to the very last byte
        driver.erase(15, 15).unwrap();
        let data = [0x11; 600];
        driver.write(&data, 0x10000 - 600).unwrap();
        let mut buf = [0u8; 600];
        driver.read(&mut buf, 0x10000 - 600).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_chunk_addresses_include_bank_base() {
        let config = SimConfig {
            flash_base: 0x0800_0000,
            ..SimConfig::default()
        };
        let mut driver = setup_with(config);

        driver.write(&[0x5A; 300], 0x10).unwrap();
        let mut buf = [0u8; 300];
        driver.read(&mut buf, 0x10).unwrap();

        let writes = issued(&driver, Command::WritePage);
        assert_eq!(writes[0].address, 0x0800_0010);
        assert_eq!(writes[1].address, 0x0800_0110);
        let reads = issued(&driver, Command::ReadPage);
        assert_eq!(reads[0].address, 0x0800_0010);
        assert_eq!(reads[1].size, 44);
        assert_eq!(buf, [0x5A; 300]);
    }

    #[test]
    fn test_erase_write_read_round_trip() {
        let mut driver = setup();
        target_mut(&mut driver).flash_mut().fill(0x00);
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

        driver.erase_covering(0x1234, data.len()).unwrap();
        driver.write(&data, 0x1234).unwrap();
        let mut buf = vec![0u8; data.len()];
        driver.read(&mut buf, 0x1234).unwrap();

        assert_eq!(buf, data);
        assert_eq!(issued(&driver, Command::ReadPage).len(), 20);
    }

    #[test]
    fn test_full_range_erase_uses_single_erase_all() {
        let mut driver = setup();
        target_mut(&mut driver).flash_mut().fill(0x00);

        driver.erase(0, 15).unwrap();

        assert_eq!(issued(&driver, Command::EraseAll).len(), 1);
        assert!(issued(&driver, Command::EraseSector).is_empty());
        assert!(target(&driver).flash().iter().all(|&b| b == 0xFF));
        assert!(driver
            .bank()
            .sectors()
            .iter()
            .all(|s| s.erase_state == EraseState::Erased));
    }

    #[test]
    fn test_partial_erase_is_inclusive() {
        let mut driver = setup();
        target_mut(&mut driver).flash_mut().fill(0x00);

        driver.erase(2, 5).unwrap();

        let indices: Vec<u32> = issued(&driver, Command::EraseSector)
            .iter()
            .map(|r| r.address)
            .collect();
        assert_eq!(indices, vec![2, 3, 4, 5]);
        assert!(issued(&driver, Command::EraseAll).is_empty());

        let flash = target(&driver).flash();
        assert!(flash[..2 * 4096].iter().all(|&b| b == 0x00));
        assert!(flash[2 * 4096..6 * 4096].iter().all(|&b| b == 0xFF));
        assert!(flash[6 * 4096..].iter().all(|&b| b == 0x00));

        for (i, sector) in driver.bank().sectors().iter().enumerate() {
            let expected = if (2..=5).contains(&i) {
                EraseState::Erased
            } else {
                EraseState::Unknown
            };
            assert_eq!(sector.erase_state, expected, "sector {}", i);
        }
    }

    #[test]
    fn test_erase_verify_follows_each_sector() {
        let mut driver = setup().with_erase_verify(true);
        driver.erase(1, 2).unwrap();

        let sequence: Vec<(Command, u32)> = target(&driver)
            .commands()
            .iter()
            .filter(|r| r.command != Command::ReadFlashId)
            .map(|r| (r.command, r.address))
            .collect();
        assert_eq!(
            sequence,
            vec![
                (Command::EraseSector, 1),
                (Command::VerifySectorAfterErase, 1),
                (Command::EraseSector, 2),
                (Command::VerifySectorAfterErase, 2),
            ]
        );
    }

    #[test]
    fn test_invalid_sector_range() {
        let mut driver = setup();
        assert_eq!(
            driver.erase(5, 2),
            Err(Error::InvalidSectorRange { first: 5, last: 2 })
        );
        assert_eq!(
            driver.erase(0, 16),
            Err(Error::InvalidSectorRange { first: 0, last: 16 })
        );
        assert!(target(&driver).commands().is_empty());
    }

    #[test]
    fn test_zero_length_transfers_do_nothing() {
        let mut driver = setup();
        driver.write(&[], 0).unwrap();
        driver.read(&mut [], 0).unwrap();

        assert!(target(&driver).commands().is_empty());
        assert_eq!(target(&driver).entry(), None);
    }

    #[test]
    fn test_out_of_bounds_rejected_before_target_access() {
        let mut driver = setup();
        assert_eq!(
            driver.write(&[0u8; 10], 65530),
            Err(Error::AddressOutOfBounds)
        );
        let mut buf = [0u8; 10];
        assert_eq!(driver.read(&mut buf, 65530), Err(Error::AddressOutOfBounds));
        assert_eq!(buf, [0xFF; 10]);
        assert_eq!(target(&driver).entry(), None);
    }

    #[test]
    fn test_stalled_command_times_out_and_tears_down() {
        let mut driver = setup();
        driver.probe().unwrap();
        target_mut(&mut driver).stall(Some(Command::WritePage));

        let result = driver.write(&[0u8; 16], 0);
        assert_eq!(
            result,
            Err(Error::OperationTimeout {
                command: Command::WritePage
            })
        );
        assert_torn_down(&driver);

        let issued_at = issued(&driver, Command::WritePage)[0].issued_at_us;
        let elapsed = target(&driver).clock().now_us() - issued_at;
        assert!(elapsed >= 1_999_000, "elapsed {} us", elapsed);
        assert!(elapsed < 2_100_000, "elapsed {} us", elapsed);
    }

    #[test]
    fn test_zero_poll_interval_still_times_out() {
        let mut driver = setup();
        driver.mailbox_mut().set_timeouts(Timeouts {
            command_ms: 5,
            halt_ms: 5,
            poll_interval_us: 0,
            ..Timeouts::default()
        });
        target_mut(&mut driver).stall(Some(Command::ReadFlashId));
        target_mut(&mut driver).ignore_halt(true);

        assert_eq!(
            driver.probe(),
            Err(Error::OperationTimeout {
                command: Command::ReadFlashId
            })
        );
        assert!(!driver.is_probed());
        assert!(driver.mailbox().scratch().is_none());
        assert!(target(&driver).scratch().is_none());
        assert!(target(&driver).clock().now_us() >= 8_000);
    }

    #[test]
    fn test_erase_all_gets_long_budget() {
        let mut driver = setup();
        driver.mailbox_mut().set_timeouts(Timeouts {
            poll_interval_us: 1_000,
            ..Timeouts::default()
        });
        driver.probe().unwrap();
        target_mut(&mut driver).stall(Some(Command::EraseAll));

        let result = driver.erase(0, 15);
        assert_eq!(
            result,
            Err(Error::OperationTimeout {
                command: Command::EraseAll
            })
        );

        let issued_at = issued(&driver, Command::EraseAll)[0].issued_at_us;
        let elapsed = target(&driver).clock().now_us() - issued_at;
        assert!(elapsed >= 59_999_000, "elapsed {} us", elapsed);
        assert!(elapsed < 60_100_000, "elapsed {} us", elapsed);
        assert!(driver
            .bank()
            .sectors()
            .iter()
            .all(|s| s.erase_state == EraseState::Unknown));
        assert_torn_down(&driver);
    }

    #[test]
    fn test_device_failure_aborts_erase_loop() {
        let mut driver = setup();
        target_mut(&mut driver).fail(Command::EraseSector, 0x05);

        let result = driver.erase(1, 3);
        assert_eq!(
            result,
            Err(Error::DeviceFailure {
                command: Command::EraseSector,
                status: 0x05
            })
        );
        assert_eq!(issued(&driver, Command::EraseSector).len(), 1);
        assert_eq!(
            driver.bank().sector(1).map(|s| s.erase_state),
            Some(EraseState::Unknown)
        );
        assert_torn_down(&driver);
    }

    #[test]
    fn test_failed_read_leaves_erased_sentinel() {
        let mut driver = setup();
        target_mut(&mut driver).preload(&[0x11; 1024]).unwrap();
        target_mut(&mut driver).fail(Command::ReadPage, 0x01);

        let mut buf = [0u8; 600];
        let result = driver.read(&mut buf, 0);
        assert!(matches!(result, Err(Error::DeviceFailure { .. })));
        assert!(buf.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_not_halted_rejected() {
        let mut driver = setup();
        target_mut(&mut driver).set_state(TargetState::Running);

        let mut buf = [0u8; 8];
        assert_eq!(driver.read(&mut buf, 0), Err(Error::NotHalted));
        assert!(target(&driver).scratch().is_none());
        assert!(target(&driver).commands().is_empty());
    }

    #[test]
    fn test_misplaced_scratch_is_released() {
        let mut driver = setup();
        target_mut(&mut driver).misplace_scratch(0x1000);

        assert_eq!(driver.probe(), Err(Error::ResourceUnavailable));
        assert!(target(&driver).scratch().is_none());
        assert!(driver.mailbox().scratch().is_none());
        assert_eq!(target(&driver).entry(), None);
    }

    #[test]
    fn test_upload_failure_is_reported() {
        let mut driver = setup();
        target_mut(&mut driver).fault_writes_at(Some(0x1C00_0040));

        assert_eq!(
            driver.probe(),
            Err(Error::UploadFailed(TargetError::MemoryFault {
                addr: 0x1C00_0040
            }))
        );
        assert!(target(&driver).scratch().is_none());
        assert_eq!(target(&driver).entry(), None);
    }

    #[test]
    fn test_window_fault_is_transfer_error() {
        let mut driver = setup();
        driver.probe().unwrap();
        let window = MailboxLayout::default().data_window();
        target_mut(&mut driver).fault_writes_at(Some(window));

        let result = driver.write(&[0u8; 32], 0);
        assert_eq!(
            result,
            Err(Error::TransferIOError(TargetError::MemoryFault { addr: window }))
        );
        assert!(issued(&driver, Command::WritePage).is_empty());
        assert_torn_down(&driver);
    }

    #[test]
    fn test_blank_check_updates_erase_state() {
        let mut driver = setup();
        driver.blank_check().unwrap();
        assert!(driver
            .bank()
            .sectors()
            .iter()
            .all(|s| s.erase_state == EraseState::Erased));

        driver.write(&[0x00; 4], 4095).unwrap();
        assert_eq!(
            driver.bank().sector(0).map(|s| s.erase_state),
            Some(EraseState::NotErased)
        );
        assert_eq!(
            driver.bank().sector(1).map(|s| s.erase_state),
            Some(EraseState::NotErased)
        );
        assert_eq!(
            driver.bank().sector(2).map(|s| s.erase_state),
            Some(EraseState::Erased)
        );

        let result = driver.blank_check();
        assert_eq!(
            result,
            Err(Error::DeviceFailure {
                command: Command::VerifyBlank,
                status: target::STATUS_NOT_BLANK
            })
        );
        assert!(driver
            .bank()
            .sectors()
            .iter()
            .all(|s| s.erase_state == EraseState::Unknown));
    }

    #[test]
    fn test_keep_alive_ticks_during_long_commands() {
        let config = SimConfig {
            busy_polls: 12_000,
            ..SimConfig::default()
        };
        let mut driver = setup_with(config);
        let ticks = Rc::new(Cell::new(0u32));
        let counter = ticks.clone();
        driver
            .mailbox_mut()
            .set_keep_alive(Some(Box::new(move || counter.set(counter.get() + 1))));

        // 12000 polls of 100 us each: 1.2 s per command
        driver.probe().unwrap();
        assert_eq!(ticks.get(), 2);

        driver.mass_erase().unwrap();
        assert_eq!(ticks.get(), 4);
    }

    #[test]
    fn test_teardown_survives_core_that_will_not_halt() {
        let mut driver = setup();
        target_mut(&mut driver).ignore_halt(true);

        driver.probe().unwrap();
        assert!(target(&driver).scratch().is_none());
        assert!(driver.mailbox().scratch().is_none());
    }

    #[test]
    fn test_read_all() {
        let mut driver = setup();
        target_mut(&mut driver).preload(b"mailbox").unwrap();

        let image = driver.read_all().unwrap();
        assert_eq!(image.len(), 65536);
        assert_eq!(&image[..7], b"mailbox");
        assert_eq!(issued(&driver, Command::ReadPage).len(), 256);
    }
}
