// Property coverage for the framing law the on-disk format depends on.

use aead_codec::{AeadCodec, KEY_LEN, MIN_BLOB_LEN};
use proptest::prelude::*;

proptest! {
    #[test]
    fn frame_length_and_round_trip(
        plaintext in proptest::collection::vec(any::<u8>(), 0..4096),
        aad in proptest::collection::vec(any::<u8>(), 0..64),
        key_byte in any::<u8>(),
    ) {
        let codec = AeadCodec::new(b"codec_properties");
        let key = [key_byte; KEY_LEN];

        let blob = codec.encrypt(&plaintext, &key, &aad).unwrap();
        prop_assert_eq!(blob.len(), plaintext.len() + MIN_BLOB_LEN);

        let got = codec.decrypt(&blob, &key, &aad).unwrap();
        prop_assert_eq!(got, plaintext);
    }

    #[test]
    fn truncation_never_verifies(
        plaintext in proptest::collection::vec(any::<u8>(), 1..512),
        cut in 1usize..=16,
    ) {
        let codec = AeadCodec::new(b"codec_properties");
        let key = [0x5au8; KEY_LEN];

        let blob = codec.encrypt(&plaintext, &key, b"").unwrap();
        let shortened = &blob[..blob.len() - cut.min(blob.len())];
        prop_assert!(codec.decrypt(shortened, &key, b"").is_err());
    }
}
