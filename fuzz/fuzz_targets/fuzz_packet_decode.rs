//! Fuzz target for remote input packet decoding.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary bytes
//! - A decoded packet survives a re-encode unchanged
//! - The inbox only ever holds packets that decoded

#![no_main]

use libfuzzer_sys::fuzz_target;
use rollback_sync::{RemoteInbox, RemoteInputPacket};

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = RemoteInputPacket::<u16>::decode(data) {
        let encoded = packet.encode().expect("decoded packet must re-encode");
        let again = RemoteInputPacket::<u16>::decode(&encoded).expect("re-encoded packet must decode");
        assert_eq!(again, packet);
    }

    let inbox: RemoteInbox<[u8; 3]> = RemoteInbox::new();
    let accepted = inbox.push_bytes(data).is_ok();
    assert_eq!(inbox.len(), usize::from(accepted));
});
