use bos_auth_support::hs256::build_claims;
use bos_types::{ActorType, BusinessId};
use proptest::prelude::*;

proptest! {
    #[test]
    fn expiry_is_always_issued_at_plus_ttl(ttl_secs in 0u64..1_000_000) {
        let claims = build_claims("owner-1", ActorType::Human, BusinessId::new(), vec![], ttl_secs).unwrap();
        prop_assert_eq!(claims.exp, claims.iat + ttl_secs);
    }

    #[test]
    fn every_minted_claim_gets_a_distinct_token_id(ttl_secs in 0u64..1_000_000) {
        let a = build_claims("owner-1", ActorType::Human, BusinessId::new(), vec![], ttl_secs).unwrap();
        let b = build_claims("owner-1", ActorType::Human, BusinessId::new(), vec![], ttl_secs).unwrap();
        prop_assert_ne!(a.jti, b.jti);
    }
}
