use log::{debug, trace, warn};
use rand::{rngs::OsRng, CryptoRng, Rng, RngCore};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    digest::decoy_digest, DecoyMode, DigestedDisclosures, Disclosure, Error, SdMap, DIGESTS_KEY,
    MAX_DEPTH,
};

/// JWT payload with selective disclosures.
///
/// Holds the undisclosed payload, where every selectively disclosable claim is
/// replaced by its digest in an `_sd` array, and the disclosures, indexed by
/// digest, that a holder may reveal.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SdPayload {
    undisclosed_payload: Map<String, Value>,
    digested_disclosures: DigestedDisclosures,
}

impl SdPayload {
    /// Creates a payload from its parts.
    pub fn new(
        undisclosed_payload: Map<String, Value>,
        digested_disclosures: DigestedDisclosures,
    ) -> Self {
        Self {
            undisclosed_payload,
            digested_disclosures,
        }
    }

    /// Conceals the claims of `full` marked as selectively disclosable by
    /// `sd_map`.
    pub fn create(full: &Map<String, Value>, sd_map: &SdMap) -> Self {
        Self::create_with(full, sd_map, &mut OsRng)
    }

    /// Same as [`Self::create`], drawing salts and decoys from `rng`.
    pub fn create_with(
        full: &Map<String, Value>,
        sd_map: &SdMap,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Self {
        let mut digested_disclosures = BTreeMap::new();
        let undisclosed_payload = conceal_object(full, sd_map, rng, &mut digested_disclosures);

        debug!(
            "created SD-JWT payload with {} disclosures",
            digested_disclosures.len()
        );

        Self {
            undisclosed_payload,
            digested_disclosures,
        }
    }

    /// Conceals every claim of `full` that does not appear in `undisclosed`.
    ///
    /// See [`SdMap::from_full_and_undisclosed_with_decoys`].
    pub fn create_from_undisclosed(
        full: &Map<String, Value>,
        undisclosed: &Map<String, Value>,
        decoy_mode: DecoyMode,
        decoys: usize,
    ) -> Self {
        Self::create(
            full,
            &SdMap::from_full_and_undisclosed_with_decoys(full, undisclosed, decoy_mode, decoys),
        )
    }

    /// Rebuilds a payload from a (signed) undisclosed payload and encoded
    /// disclosures.
    ///
    /// Fails with [`Error::DuplicateDisclosure`] if the same disclosure is
    /// given twice.
    pub fn create_from<I>(
        undisclosed_payload: Map<String, Value>,
        disclosures: I,
    ) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut digested_disclosures = BTreeMap::new();
        for encoded in disclosures {
            let disclosure = Disclosure::parse(encoded.as_ref())?;
            if digested_disclosures
                .insert(disclosure.digest(), disclosure)
                .is_some()
            {
                return Err(Error::DuplicateDisclosure);
            }
        }

        Ok(Self {
            undisclosed_payload,
            digested_disclosures,
        })
    }

    /// Payload with every selectively disclosable claim replaced by digests.
    pub fn undisclosed_payload(&self) -> &Map<String, Value> {
        &self.undisclosed_payload
    }

    /// Disclosures, indexed by digest.
    pub fn digested_disclosures(&self) -> &DigestedDisclosures {
        &self.digested_disclosures
    }

    /// Iterates over the disclosures.
    pub fn disclosures(&self) -> impl Iterator<Item = &Disclosure> {
        self.digested_disclosures.values()
    }

    /// Intent matching this payload and its disclosures.
    pub fn sd_map(&self) -> SdMap {
        SdMap::regenerate(&self.undisclosed_payload, &self.digested_disclosures)
    }

    /// Reveals every claim for which a disclosure is available.
    ///
    /// Digests without a matching disclosure are dropped from the result. A
    /// disclosure referenced more than once is an error.
    pub fn full_payload(&self) -> Result<Map<String, Value>, Error> {
        Revealer::new(&self.digested_disclosures).reveal_object(&self.undisclosed_payload, 0)
    }

    /// Checks that every disclosure is referenced by a digest reachable from
    /// the undisclosed payload.
    ///
    /// Fails if a digest is referenced more than once, or if disclosed
    /// objects are nested deeper than [`crate::MAX_DEPTH`].
    pub fn verify_disclosures(&self) -> bool {
        let mut revealer = Revealer::new(&self.digested_disclosures);

        match revealer.reveal_object(&self.undisclosed_payload, 0) {
            Ok(_) => {
                let unused = self.digested_disclosures.len() - revealer.used.len();
                if unused > 0 {
                    warn!("{unused} disclosures are not referenced by the payload");
                }

                unused == 0
            }
            Err(e) => {
                warn!("{e}");
                false
            }
        }
    }

    /// Keeps only the disclosures selected by `sd_map`.
    ///
    /// A disclosure is kept when its key is selectively disclosable at the
    /// level of `sd_map` where its digest is found. Nested levels are visited
    /// when `sd_map` has children for them.
    pub fn with_selective_disclosures(&self, sd_map: &SdMap) -> Result<Self, Error> {
        let mut selected = BTreeSet::new();
        self.select(&self.undisclosed_payload, sd_map, &mut selected, 0)?;

        debug!(
            "selected {} of {} disclosures",
            selected.len(),
            self.digested_disclosures.len()
        );

        Ok(Self {
            undisclosed_payload: self.undisclosed_payload.clone(),
            digested_disclosures: self
                .digested_disclosures
                .iter()
                .filter(|(digest, _)| selected.contains(digest.as_str()))
                .map(|(digest, disclosure)| (digest.clone(), disclosure.clone()))
                .collect(),
        })
    }

    /// Same payload, without any disclosure.
    pub fn without_disclosures(&self) -> Self {
        Self {
            undisclosed_payload: self.undisclosed_payload.clone(),
            digested_disclosures: BTreeMap::new(),
        }
    }

    fn select<'a>(
        &'a self,
        object: &'a Map<String, Value>,
        sd_map: &SdMap,
        selected: &mut BTreeSet<&'a str>,
        depth: usize,
    ) -> Result<(), Error> {
        if depth >= MAX_DEPTH {
            return Err(Error::NestingTooDeep);
        }

        for (key, value) in object {
            if key == DIGESTS_KEY {
                for digest in digests(value)? {
                    let Some(disclosure) = self.digested_disclosures.get(digest) else {
                        continue;
                    };

                    if sd_map.is_sd(disclosure.key()) {
                        trace!("selecting disclosure {digest}");
                        if !selected.insert(digest) {
                            return Err(Error::DisclosureUsedMultipleTimes);
                        }

                        if let (Value::Object(nested), Some(children)) =
                            (disclosure.value(), sd_map.children(disclosure.key()))
                        {
                            self.select(nested, children, selected, depth + 1)?;
                        }
                    }
                }
            } else if let (Value::Object(nested), Some(children)) = (value, sd_map.children(key)) {
                self.select(nested, children, selected, depth + 1)?;
            }
        }

        Ok(())
    }
}

/// Reads the digests of an `_sd` claim value.
fn digests(value: &Value) -> Result<Vec<&str>, Error> {
    value
        .as_array()
        .ok_or(Error::InvalidDigestsField)?
        .iter()
        .map(|digest| digest.as_str().ok_or(Error::InvalidDigestsField))
        .collect()
}

fn conceal_object<R: CryptoRng + RngCore>(
    object: &Map<String, Value>,
    sd_map: &SdMap,
    rng: &mut R,
    disclosures: &mut DigestedDisclosures,
) -> Map<String, Value> {
    let mut result = Map::new();
    let mut digests = Vec::new();

    for (key, value) in object {
        let sd = sd_map.is_sd(key);

        match (value, sd_map.children(key)) {
            (Value::Object(nested), Some(children)) => {
                let nested = Value::Object(conceal_object(nested, children, rng, disclosures));
                if sd {
                    digests.push(add_disclosure(rng, key, nested, disclosures));
                } else {
                    result.insert(key.clone(), nested);
                }
            }
            _ if sd => digests.push(add_disclosure(rng, key, value.clone(), disclosures)),
            _ => {
                result.insert(key.clone(), value.clone());
            }
        }
    }

    if !digests.is_empty() {
        for _ in 0..decoy_count(sd_map, rng) {
            digests.push(decoy_digest(rng));
        }

        // Sorting hides which digests are decoys.
        digests.sort_unstable();
        result.insert(
            DIGESTS_KEY.to_owned(),
            digests.into_iter().map(Value::String).collect(),
        );
    }

    result
}

fn add_disclosure<R: CryptoRng + RngCore>(
    rng: &mut R,
    key: &str,
    value: Value,
    disclosures: &mut DigestedDisclosures,
) -> String {
    let disclosure = Disclosure::generate_with(rng, key, value);
    let digest = disclosure.digest();
    trace!("concealed `{key}` as {digest}");
    disclosures.insert(digest.clone(), disclosure);
    digest
}

fn decoy_count<R: CryptoRng + RngCore>(sd_map: &SdMap, rng: &mut R) -> usize {
    match (sd_map.decoy_mode(), sd_map.decoys()) {
        (_, 0) | (DecoyMode::None, _) => 0,
        (DecoyMode::Fixed, decoys) => decoys,
        (DecoyMode::Random, decoys) => rng.gen_range(1..=decoys),
    }
}

/// Expands `_sd` claims.
///
/// Each disclosure may be resolved once. The `used` set holds the digests
/// resolved so far, so that the disclosures left over afterwards are the
/// ones the payload never references.
struct Revealer<'a> {
    disclosures: &'a DigestedDisclosures,
    used: BTreeSet<&'a str>,
}

impl<'a> Revealer<'a> {
    fn new(disclosures: &'a DigestedDisclosures) -> Self {
        Self {
            disclosures,
            used: BTreeSet::new(),
        }
    }

    fn reveal_object(
        &mut self,
        object: &Map<String, Value>,
        depth: usize,
    ) -> Result<Map<String, Value>, Error> {
        if depth >= MAX_DEPTH {
            return Err(Error::NestingTooDeep);
        }

        let mut result = Map::new();

        for (key, value) in object {
            if key == DIGESTS_KEY {
                for digest in digests(value)? {
                    if let Some(disclosure) = self.resolve(digest)? {
                        let revealed = self.reveal_value(disclosure.value(), depth)?;
                        result.insert(disclosure.key().to_owned(), revealed);
                    }
                }
            } else {
                let revealed = self.reveal_value(value, depth)?;
                result.insert(key.clone(), revealed);
            }
        }

        Ok(result)
    }

    fn reveal_value(&mut self, value: &Value, depth: usize) -> Result<Value, Error> {
        match value {
            Value::Object(object) => self.reveal_object(object, depth + 1).map(Value::Object),
            value => Ok(value.clone()),
        }
    }

    fn resolve(&mut self, digest: &str) -> Result<Option<&'a Disclosure>, Error> {
        let Some((digest, disclosure)) = self.disclosures.get_key_value(digest) else {
            trace!("no disclosure for digest {digest}");
            return Ok(None);
        };

        if !self.used.insert(digest.as_str()) {
            return Err(Error::DisclosureUsedMultipleTimes);
        }

        Ok(Some(disclosure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SdField;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(object) => object,
            _ => panic!("not an object"),
        }
    }

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(42)
    }

    fn sd_digests(object: &Map<String, Value>) -> Vec<&str> {
        digests(&object[DIGESTS_KEY]).unwrap()
    }

    #[test]
    fn conceal_top_level_claim() {
        let full = object(json!({"sub": "123", "aud": "456"}));
        let undisclosed = object(json!({"aud": "456"}));
        let payload = SdPayload::create_from_undisclosed(&full, &undisclosed, DecoyMode::None, 0);

        let digests = sd_digests(payload.undisclosed_payload());
        assert_eq!(digests.len(), 1);
        assert_eq!(payload.undisclosed_payload()["aud"], json!("456"));
        assert!(!payload.undisclosed_payload().contains_key("sub"));

        let disclosure = &payload.digested_disclosures()[digests[0]];
        assert_eq!(disclosure.key(), "sub");
        assert_eq!(disclosure.value(), &json!("123"));

        assert_eq!(payload.full_payload().unwrap(), full);
        assert!(payload.verify_disclosures());
    }

    #[test]
    fn no_digests_field_without_disclosable_claims() {
        let full = object(json!({"aud": "456", "nested": {"a": 1}}));
        let sd_map = SdMap::from_paths(Vec::<String>::new());
        let payload = SdPayload::create_with(&full, &sd_map, &mut rng());

        assert_eq!(payload.undisclosed_payload(), &full);
        assert!(payload.digested_disclosures().is_empty());
    }

    #[test]
    fn fixed_decoys() {
        let full = object(json!({"a": 1, "b": 2}));
        let sd_map = SdMap::from_full_and_undisclosed_with_decoys(
            &full,
            &Map::new(),
            DecoyMode::Fixed,
            5,
        );
        let payload = SdPayload::create_with(&full, &sd_map, &mut rng());

        let digests = sd_digests(payload.undisclosed_payload());
        assert_eq!(digests.len(), 7);
        assert_eq!(payload.digested_disclosures().len(), 2);

        let mut sorted = digests.clone();
        sorted.sort_unstable();
        assert_eq!(digests, sorted);
        assert_eq!(payload.full_payload().unwrap(), full);
    }

    #[test]
    fn random_decoys_within_bounds() {
        let full = object(json!({"a": 1}));
        let sd_map =
            SdMap::from_full_and_undisclosed_with_decoys(&full, &Map::new(), DecoyMode::Random, 3);
        let mut rng = rng();

        for _ in 0..32 {
            let payload = SdPayload::create_with(&full, &sd_map, &mut rng);
            let count = sd_digests(payload.undisclosed_payload()).len() - 1;
            assert!((1..=3).contains(&count));
        }
    }

    #[test]
    fn decoys_require_real_digests() {
        let full = object(json!({"a": 1}));
        let sd_map =
            SdMap::from_full_and_undisclosed_with_decoys(&full, &full, DecoyMode::Fixed, 4);
        let payload = SdPayload::create_with(&full, &sd_map, &mut rng());

        assert!(!payload.undisclosed_payload().contains_key(DIGESTS_KEY));
    }

    #[test]
    fn nested_object_disclosed_as_a_whole() {
        let full = object(json!({"address": {"street": "Main", "zip": "1234"}}));
        let sd_map = SdMap::from_paths(["address.street"]);
        let payload = SdPayload::create_with(&full, &sd_map, &mut rng());

        // `address` is concealed as a whole, its value being itself concealed.
        assert_eq!(payload.digested_disclosures().len(), 2);
        let address = payload
            .disclosures()
            .find(|d| d.key() == "address")
            .unwrap();
        assert_eq!(address.value()["zip"], json!("1234"));
        assert!(address.value().get("street").is_none());
        assert_eq!(digests(&address.value()[DIGESTS_KEY]).unwrap().len(), 1);

        assert_eq!(payload.full_payload().unwrap(), full);
        assert!(payload.verify_disclosures());
    }

    #[test]
    fn unresolvable_digests_are_dropped() {
        let payload = SdPayload::new(
            object(json!({"_sd": ["unknown"], "aud": "456"})),
            BTreeMap::new(),
        );

        assert_eq!(payload.full_payload().unwrap(), object(json!({"aud": "456"})));
        assert!(payload.verify_disclosures());
    }

    #[test]
    fn invalid_digests_field() {
        let payload = SdPayload::new(object(json!({"_sd": "digest"})), BTreeMap::new());
        assert!(matches!(
            payload.full_payload(),
            Err(Error::InvalidDigestsField)
        ));
        assert!(!payload.verify_disclosures());
        assert!(matches!(
            payload.with_selective_disclosures(&SdMap::default()),
            Err(Error::InvalidDigestsField)
        ));

        let payload = SdPayload::new(object(json!({"_sd": [12]})), BTreeMap::new());
        assert!(matches!(
            payload.full_payload(),
            Err(Error::InvalidDigestsField)
        ));
    }

    /// Payload referencing a chain of `length` disclosures, each one
    /// referencing the next `fan_out` times.
    fn disclosure_chain(length: usize, fan_out: usize) -> SdPayload {
        let mut rng = rng();
        let mut disclosures = BTreeMap::new();
        let mut next = Disclosure::generate_with(&mut rng, "leaf", json!(true));

        for _ in 0..length {
            let digest = next.digest();
            disclosures.insert(digest.clone(), next);
            next = Disclosure::generate_with(
                &mut rng,
                "link",
                json!({ "_sd": vec![digest; fan_out] }),
            );
        }

        let undisclosed = object(json!({ "_sd": [next.digest()] }));
        disclosures.insert(next.digest(), next);
        SdPayload::new(undisclosed, disclosures)
    }

    #[test]
    fn repeated_digest_is_rejected() {
        let disclosure = Disclosure::generate("sub", json!("123"));
        let digest = disclosure.digest();
        let payload = SdPayload::new(
            object(json!({ "_sd": [digest, digest] })),
            [(digest.clone(), disclosure)].into_iter().collect(),
        );

        assert!(!payload.verify_disclosures());
        assert!(matches!(
            payload.full_payload(),
            Err(Error::DisclosureUsedMultipleTimes)
        ));
        assert!(matches!(
            payload.with_selective_disclosures(&SdMap::from_paths(["sub"])),
            Err(Error::DisclosureUsedMultipleTimes)
        ));
    }

    #[test]
    fn repeated_digests_do_not_multiply() {
        // Would expand 2^64 times if repeated digests were followed.
        let payload = disclosure_chain(64, 2);

        assert!(!payload.verify_disclosures());
        assert!(matches!(
            payload.full_payload(),
            Err(Error::DisclosureUsedMultipleTimes)
        ));
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let payload = disclosure_chain(MAX_DEPTH - 1, 1);
        assert!(payload.verify_disclosures());
        assert!(payload.full_payload().is_ok());

        let payload = disclosure_chain(20_000, 1);
        assert!(!payload.verify_disclosures());
        assert!(matches!(
            payload.full_payload(),
            Err(Error::NestingTooDeep)
        ));

        let mut selection = SdMap::from_paths(["link"]);
        for _ in 0..MAX_DEPTH {
            selection = [("link".to_owned(), SdField::new(true, Some(selection)))]
                .into_iter()
                .collect();
        }
        assert!(matches!(
            payload.with_selective_disclosures(&selection),
            Err(Error::NestingTooDeep)
        ));

        // Regeneration stops descending at the depth limit.
        let mut sd_map = payload.sd_map();
        let mut depth = 0;
        while let Some(children) = sd_map.children("link") {
            sd_map = children.clone();
            depth += 1;
        }
        assert!(depth < MAX_DEPTH);
    }

    #[test]
    fn create_from_rejects_duplicate_disclosures() {
        let encoded = "WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgImNvdW50cnkiLCAiSlAiXQ";
        assert!(matches!(
            SdPayload::create_from(Map::new(), [encoded, encoded]),
            Err(Error::DuplicateDisclosure)
        ));
    }

    #[test]
    fn unreferenced_disclosure_fails_verification() {
        let full = object(json!({"sub": "123", "aud": "456"}));
        let payload = SdPayload::create_from_undisclosed(
            &full,
            &object(json!({"aud": "456"})),
            DecoyMode::None,
            0,
        );
        let orphan = Disclosure::generate("extra", json!(true));

        let mut disclosures = payload.digested_disclosures().clone();
        disclosures.insert(orphan.digest(), orphan);
        let tampered = SdPayload::new(payload.undisclosed_payload().clone(), disclosures);

        assert!(!tampered.verify_disclosures());
        // Expansion ignores the orphan.
        assert_eq!(tampered.full_payload().unwrap(), full);
    }

    #[test]
    fn select_nested_disclosures() {
        let full = object(json!({
            "sub": "123",
            "nested": {"a": 1, "b": 2}
        }));
        let sd_map = SdMap::from_full_and_undisclosed(
            &full,
            &object(json!({"nested": {}})),
        );
        let payload = SdPayload::create_with(&full, &sd_map, &mut rng());
        assert_eq!(payload.digested_disclosures().len(), 3);

        let selection = SdMap::from_paths(["nested.a"]);
        let presented = payload.with_selective_disclosures(&selection).unwrap();

        // `nested` is inline, so `nested` being marked selects nothing by
        // itself; only `a` is revealed.
        assert_eq!(presented.undisclosed_payload(), payload.undisclosed_payload());
        assert_eq!(presented.digested_disclosures().len(), 1);
        assert_eq!(
            presented.full_payload().unwrap(),
            object(json!({"nested": {"a": 1}}))
        );
        assert!(presented.verify_disclosures());
    }

    #[test]
    fn regenerated_sd_map_selects_everything() {
        let full = object(json!({
            "sub": "123",
            "address": {"street": "Main", "zip": "1234"}
        }));
        let sd_map = SdMap::from_paths(["sub", "address.street", "address.zip"]);
        let payload = SdPayload::create_with(&full, &sd_map, &mut rng());

        let regenerated = payload.sd_map();
        assert!(regenerated.is_sd("sub"));
        assert!(regenerated.children("address").unwrap().is_sd("zip"));

        let presented = payload.with_selective_disclosures(&regenerated).unwrap();
        assert_eq!(presented, payload);
    }

    #[test]
    fn create_from_indexes_by_digest() {
        let encoded = "WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgImNvdW50cnkiLCAiSlAiXQ";
        let payload = SdPayload::create_from(
            object(json!({"_sd": ["uNHoWYhXsZhVJCNE2Dqy-zqt7t69gJKy5QaFv7GrMX4"]})),
            [encoded],
        )
        .unwrap();

        assert_eq!(
            payload.full_payload().unwrap(),
            object(json!({"country": "JP"}))
        );
        assert!(payload.verify_disclosures());
    }
}
