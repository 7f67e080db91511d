use bos_auth_support::hs256::{build_claims, JwtHs256Token, JwtHs256Validator};
use bos_auth_support::{CapabilityToken, Error, TokenValidator};
use bos_types::{ActorType, BusinessId};

#[tokio::test]
async fn mint_then_validate_round_trips_claims() {
    let business_id = BusinessId::new();
    let claims = build_claims("owner-1", ActorType::Human, business_id, vec!["marketing".to_string()], 3600).unwrap();
    let token = JwtHs256Token::mint(&claims, b"secret").await.unwrap();

    let validator = JwtHs256Validator::new("secret");
    let recovered = validator.validate(token.as_str()).await.unwrap();

    assert_eq!(recovered.sub, "owner-1");
    assert_eq!(recovered.business_id, business_id);
    assert_eq!(recovered.actor_type, ActorType::Human);
    assert_eq!(recovered.scopes, vec!["marketing".to_string()]);
}

#[tokio::test]
async fn validation_fails_against_the_wrong_secret() {
    let business_id = BusinessId::new();
    let claims = build_claims("owner-1", ActorType::Human, business_id, vec![], 3600).unwrap();
    let token = JwtHs256Token::mint(&claims, b"secret").await.unwrap();

    let validator = JwtHs256Validator::new("a-different-secret");
    let err = validator.validate(token.as_str()).await.unwrap_err();
    assert!(matches!(err, Error::Token(_)));
}

#[tokio::test]
async fn an_already_expired_token_is_rejected() {
    let business_id = BusinessId::new();
    let mut claims = build_claims("owner-1", ActorType::Human, business_id, vec![], 3600).unwrap();
    claims.exp = claims.iat;

    let token = JwtHs256Token::mint(&claims, b"secret").await.unwrap();
    let validator = JwtHs256Validator::new("secret");
    let err = validator.validate(token.as_str()).await.unwrap_err();
    assert!(matches!(err, Error::Token(_)));
}

#[tokio::test]
async fn claims_accessor_matches_the_trait_based_validator() {
    let business_id = BusinessId::new();
    let claims = build_claims("owner-1", ActorType::System, business_id, vec![], 60).unwrap();
    let token = JwtHs256Token::mint(&claims, b"secret").await.unwrap();

    let via_accessor = token.claims("secret").unwrap();
    let validator = JwtHs256Validator::new("secret");
    let via_trait = validator.validate(token.as_str()).await.unwrap();

    assert_eq!(via_accessor, via_trait);
}
