use std::collections::btree_map::{self, BTreeMap};

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Price label used when a listing card carries no price element.
pub const UNKNOWN_PRICE: &str = "unknown";

/// One catalog item as scraped from a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Relative URL path of the product page; identity across scrapes.
    pub key: String,
    pub name: String,
    /// Opaque, site-formatted price text.
    pub price: String,
    pub image_url: Option<String>,
}

/// Full catalog state at one point in time, keyed by listing path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    listings: BTreeMap<String, Listing>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a listing, replacing (and returning) any earlier record with the same key.
    pub fn insert(&mut self, listing: Listing) -> Option<Listing> {
        self.listings.insert(listing.key.clone(), listing)
    }

    pub fn get(&self, key: &str) -> Option<&Listing> {
        self.listings.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.listings.contains_key(key)
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, Listing> {
        self.listings.keys()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

impl FromIterator<Listing> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Listing>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for listing in iter {
            snapshot.insert(listing);
        }
        snapshot
    }
}

impl Extend<Listing> for Snapshot {
    fn extend<I: IntoIterator<Item = Listing>>(&mut self, iter: I) {
        for listing in iter {
            self.insert(listing);
        }
    }
}

// On disk a snapshot is `{ "<key>": { "name", "price", "image" } }`.
#[derive(Serialize)]
struct StoredListingRef<'a> {
    name: &'a str,
    price: &'a str,
    image: Option<&'a str>,
}

#[derive(Deserialize)]
struct StoredListing {
    name: String,
    price: String,
    #[serde(default)]
    image: Option<String>,
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.listings.len()))?;
        for (key, listing) in &self.listings {
            map.serialize_entry(
                key,
                &StoredListingRef {
                    name: &listing.name,
                    price: &listing.price,
                    image: listing.image_url.as_deref(),
                },
            )?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = BTreeMap::<String, StoredListing>::deserialize(deserializer)?;
        Ok(stored
            .into_iter()
            .map(|(key, stored)| Listing {
                key,
                name: stored.name,
                price: stored.price,
                image_url: stored.image,
            })
            .collect())
    }
}
