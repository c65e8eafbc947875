mod common;

use common::{FLASH_SECTOR_SIZE, Flash};
use param_registry::Error;
use param_registry::storage::{AlternatingStore, PagedStore, Slot, SlotLayout, Storage};
use pretty_assertions::assert_eq;

const LAYOUT: SlotLayout = SlotLayout::new()
    .with(Slot::ParameterImage, 96)
    .with(Slot::ApplicationImage, 32);

fn alternating(flash: Flash) -> AlternatingStore<Flash> {
    let size = flash.len();
    let mut store = AlternatingStore::new(flash, 0, size, LAYOUT).unwrap();
    store.mount().unwrap();
    store
}

fn paged(flash: Flash) -> PagedStore<Flash> {
    let mut store = PagedStore::new(flash, 0, FLASH_SECTOR_SIZE, LAYOUT).unwrap();
    store.mount().unwrap();
    store
}

fn read(store: &mut impl Storage, slot: Slot) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; store.capacity(slot)];
    let len = store.read(slot, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

#[test]
fn alternating_empty_slot() {
    let mut store = alternating(Flash::new(4));

    assert_eq!(read(&mut store, Slot::ParameterImage), Err(Error::StorageDataUnavailable));
    assert_eq!(
        store.image_vitality(Slot::ParameterImage),
        Err(Error::StorageDataUnavailable)
    );
}

#[test]
fn alternating_requires_mount() {
    let mut store = AlternatingStore::new(Flash::new(4), 0, 4 * FLASH_SECTOR_SIZE, LAYOUT).unwrap();

    assert_eq!(
        store.write(Slot::ParameterImage, &[1, 2, 3]),
        Err(Error::StorageNotInitialized)
    );
    assert_eq!(read(&mut store, Slot::ParameterImage), Err(Error::StorageNotInitialized));
}

#[test]
fn alternating_rejects_bad_geometry() {
    let too_big = SlotLayout::new().with(Slot::ParameterImage, 1000);
    assert!(matches!(
        AlternatingStore::new(Flash::new(4), 0, 4 * FLASH_SECTOR_SIZE, too_big),
        Err(Error::StorageNvmemTooSmall)
    ));
    assert!(matches!(
        AlternatingStore::new(Flash::new(4), 0, 8 * FLASH_SECTOR_SIZE, LAYOUT),
        Err(Error::StorageNvmemTooSmall)
    ));
    assert!(matches!(
        AlternatingStore::new(Flash::new(4), 4, 2 * FLASH_SECTOR_SIZE, LAYOUT),
        Err(Error::AddressNotAccessible)
    ));
}

#[test]
fn alternating_slot_limits() {
    let mut store = alternating(Flash::new(4));

    assert_eq!(
        store.write(Slot::ApplicationImage, &[0u8; 33]),
        Err(Error::StorageDataTooBig)
    );
    assert_eq!(
        store.write(Slot::AdaptiveDataImage, &[1]),
        Err(Error::IndexOutOfBoundary)
    );

    store.write(Slot::ApplicationImage, &[7u8; 32]).unwrap();
    let mut small = [0u8; 8];
    assert_eq!(
        store.read(Slot::ApplicationImage, &mut small),
        Err(Error::BufferTooSmall)
    );
}

#[test]
fn alternating_round_trip_survives_remount() {
    let mut store = alternating(Flash::new(4));

    store.write(Slot::ParameterImage, b"first image").unwrap();
    store.write(Slot::ApplicationImage, b"app").unwrap();
    store.write(Slot::ParameterImage, b"second image").unwrap();

    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), b"second image");
    assert_eq!(store.image_vitality(Slot::ParameterImage), Ok(()));

    let mut store = alternating(store.into_inner());
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), b"second image");
    assert_eq!(read(&mut store, Slot::ApplicationImage).unwrap(), b"app");
    assert_eq!(store.image_vitality(Slot::ParameterImage), Ok(()));
}

#[test]
fn alternating_writes_alternate_blocks() {
    let mut store = alternating(Flash::new(4));
    let block_size = 2 * FLASH_SECTOR_SIZE;

    store.write(Slot::ParameterImage, &[0x11; 12]).unwrap();
    let flash = store.into_inner();
    assert_ne!(flash.buf[0..8], [0xFF; 8]);
    assert_eq!(flash.buf[block_size..block_size + 8], [0xFF; 8]);

    let mut store = alternating(flash);
    store.write(Slot::ParameterImage, &[0x22; 12]).unwrap();
    let flash = store.into_inner();
    assert_ne!(flash.buf[block_size..block_size + 8], [0xFF; 8]);

    // the third write reuses block 0
    let mut store = alternating(flash);
    store.write(Slot::ParameterImage, &[0x33; 12]).unwrap();
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [0x33; 12]);
    let flash = store.into_inner();
    assert_eq!(flash.buf[8..20], [0x33; 12]);
    assert_eq!(flash.buf[block_size + 8..block_size + 20], [0x22; 12]);
}

#[test]
fn alternating_torn_write_keeps_previous_copy() {
    let mut store = alternating(Flash::new(4));
    store.write(Slot::ParameterImage, &[0x11; 12]).unwrap();

    // erase and payload go through, the header write fails
    store.flash().fail_after(2);
    assert_eq!(
        store.write(Slot::ParameterImage, &[0x22; 12]),
        Err(Error::StorageNotAccessible)
    );
    store.flash().disable_faults();

    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [0x11; 12]);
    assert_eq!(
        store.image_vitality(Slot::ParameterImage),
        Err(Error::StorageImageUncertain)
    );

    // without a header the torn copy is just an empty block
    let mut store = alternating(store.into_inner());
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [0x11; 12]);
    assert_eq!(store.image_vitality(Slot::ParameterImage), Ok(()));

    store.write(Slot::ParameterImage, &[0x33; 12]).unwrap();
    let mut store = alternating(store.into_inner());
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [0x33; 12]);
}

#[test]
fn alternating_falls_back_on_crc_mismatch() {
    let mut store = alternating(Flash::new(4));
    store.write(Slot::ParameterImage, &[0x11; 12]).unwrap();
    store.write(Slot::ParameterImage, &[0xA5; 12]).unwrap();

    let mut flash = store.into_inner();
    flash.damage(2 * FLASH_SECTOR_SIZE + 8);

    let mut store = alternating(flash);
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [0x11; 12]);
    assert_eq!(
        store.image_vitality(Slot::ParameterImage),
        Err(Error::StorageImageUncertain)
    );
}

#[test]
fn alternating_reports_crc_mismatch_without_valid_copy() {
    let mut store = alternating(Flash::new(4));
    store.write(Slot::ParameterImage, &[0xA5; 12]).unwrap();

    let mut flash = store.into_inner();
    flash.damage(8);

    let mut store = alternating(flash);
    assert_eq!(read(&mut store, Slot::ParameterImage), Err(Error::StorageCrcMismatch));
    assert_eq!(
        store.image_vitality(Slot::ParameterImage),
        Err(Error::StorageCrcMismatch)
    );
}

#[test]
fn paged_empty_slot() {
    let mut store = paged(Flash::new(2));

    assert_eq!(read(&mut store, Slot::ParameterImage), Err(Error::StorageDataUnavailable));
    assert_eq!(
        store.image_vitality(Slot::ApplicationImage),
        Err(Error::StorageDataUnavailable)
    );
}

#[test]
fn paged_requires_mount() {
    let mut store = PagedStore::new(Flash::new(2), 0, FLASH_SECTOR_SIZE, LAYOUT).unwrap();

    assert_eq!(
        store.write(Slot::ParameterImage, &[1, 2, 3]),
        Err(Error::StorageNotInitialized)
    );
}

#[test]
fn paged_rejects_layout_larger_than_page() {
    let too_big = LAYOUT.with(Slot::AdaptiveDataImage, 128);
    assert!(matches!(
        PagedStore::new(Flash::new(2), 0, FLASH_SECTOR_SIZE, too_big),
        Err(Error::StorageNvmemTooSmall)
    ));
    assert!(matches!(
        PagedStore::new(Flash::new(1), 0, FLASH_SECTOR_SIZE, LAYOUT),
        Err(Error::StorageNvmemTooSmall)
    ));
}

#[test]
fn paged_round_trip_survives_remount() {
    let mut store = paged(Flash::new(2));

    store.write(Slot::ParameterImage, b"first image").unwrap();
    store.write(Slot::ApplicationImage, b"app").unwrap();
    store.write(Slot::ParameterImage, b"second image").unwrap();
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), b"second image");

    let flash = store.into_inner();
    let mut store = PagedStore::new(flash, 0, FLASH_SECTOR_SIZE, LAYOUT).unwrap();
    store.mount().unwrap();
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), b"second image");
    assert_eq!(read(&mut store, Slot::ApplicationImage).unwrap(), b"app");
    assert_eq!(store.image_vitality(Slot::ParameterImage), Ok(()));
}

#[test]
fn paged_skips_unchanged_data() {
    let mut store = paged(Flash::new(2));
    store.write(Slot::ParameterImage, &[0x42; 40]).unwrap();
    let writes = store.flash().writes();

    store.write(Slot::ParameterImage, &[0x42; 40]).unwrap();
    assert_eq!(store.flash().writes(), writes);

    store.write(Slot::ParameterImage, &[0x43; 40]).unwrap();
    assert!(store.flash().writes() > writes);
}

#[test]
fn paged_relocates_live_records() {
    let mut store = paged(Flash::new(2));
    store.write(Slot::ApplicationImage, b"application").unwrap();

    for round in 0..10u8 {
        store.write(Slot::ParameterImage, &[round; 96]).unwrap();
        assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [round; 96]);
        assert_eq!(read(&mut store, Slot::ApplicationImage).unwrap(), b"application");
    }
    assert!(store.flash().erases() > 0);

    let mut store = paged(store.into_inner());
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [9u8; 96]);
    assert_eq!(read(&mut store, Slot::ApplicationImage).unwrap(), b"application");
    assert_eq!(store.image_vitality(Slot::ParameterImage), Ok(()));
}

#[test]
fn paged_torn_append_is_renewed() {
    let mut store = paged(Flash::new(2));
    store.write(Slot::ParameterImage, &[0x11; 12]).unwrap();

    // payload goes through, the header write fails
    store.flash().fail_after(1);
    assert_eq!(
        store.write(Slot::ParameterImage, &[0x22; 16]),
        Err(Error::StorageNotAccessible)
    );
    store.flash().disable_faults();
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [0x11; 12]);

    let mut store = paged(store.into_inner());
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [0x11; 12]);
    assert_eq!(
        store.image_vitality(Slot::ParameterImage),
        Err(Error::StorageImageUncertain)
    );

    store.write(Slot::ParameterImage, &[0x33; 16]).unwrap();
    assert_eq!(store.image_vitality(Slot::ParameterImage), Ok(()));

    let mut store = paged(store.into_inner());
    assert_eq!(read(&mut store, Slot::ParameterImage).unwrap(), [0x33; 16]);
    assert_eq!(store.image_vitality(Slot::ParameterImage), Ok(()));
}

#[test]
fn paged_interrupted_relocation_keeps_a_valid_image() {
    for fault in 0.. {
        let mut store = paged(Flash::new(2));
        store.write(Slot::ApplicationImage, b"application").unwrap();
        store.write(Slot::ParameterImage, &[0x11; 96]).unwrap();
        store.write(Slot::ParameterImage, &[0x22; 96]).unwrap();

        // the page is too full for another parameter record

        store.flash().fail_after(fault);
        let result = store.write(Slot::ParameterImage, &[0x33; 96]);

        let mut flash = store.into_inner();
        flash.disable_faults();
        let mut store = paged(flash);

        let image = read(&mut store, Slot::ParameterImage).unwrap();
        assert_eq!(read(&mut store, Slot::ApplicationImage).unwrap(), b"application");
        if result.is_ok() {
            assert_eq!(image, [0x33; 96]);
            break;
        }
        assert!(image == [0x22; 96] || image == [0x33; 96], "fault {fault}: {image:?}");
    }
}

/// Power loss during a relocation, and again during the write after the reboot.
#[test]
fn paged_relocation_survives_a_second_power_loss() {
    for first in 0.. {
        let mut store = paged(Flash::new(2));
        store.write(Slot::ApplicationImage, b"application").unwrap();
        store.write(Slot::ParameterImage, &[0x11; 96]).unwrap();
        store.write(Slot::ParameterImage, &[0x22; 96]).unwrap();

        store.flash().fail_after(first);
        let first_result = store.write(Slot::ParameterImage, &[0x33; 96]);
        let rebooted = store.into_inner().snapshot();

        for second in 0.. {
            let mut store = paged(rebooted.snapshot());
            store.flash().fail_after(second);
            let second_result = store.write(Slot::ParameterImage, &[0x44; 96]);

            let mut store = paged(store.into_inner().snapshot());
            assert_eq!(
                read(&mut store, Slot::ApplicationImage),
                Ok(b"application".to_vec()),
                "faults {first}/{second}"
            );
            let image = read(&mut store, Slot::ParameterImage);
            if second_result.is_ok() {
                assert_eq!(image, Ok(vec![0x44; 96]), "faults {first}/{second}");
                break;
            }
            let image = image.unwrap();
            assert!(
                image == [0x22; 96] || image == [0x33; 96] || image == [0x44; 96],
                "faults {first}/{second}: {image:?}"
            );
        }

        if first_result.is_ok() {
            break;
        }
    }
}
