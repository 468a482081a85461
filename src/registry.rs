//! Static registry of every resource the app syncs.
//!
//! Each resource declares where it lives on the backend, which file it is cached under, whether
//! it is a collection of independently timestamped items or a singleton, and which of its fields
//! reference media assets.

/// Fields of a resource (or of a nested object) that hold asset ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaSchema {
  /// Keys whose string values are asset ids
  pub fields: &'static [&'static str],
  /// Keys holding nested objects or arrays, with the schema applied to them
  pub nested: &'static [NestedMedia],
}

/// A nested object or array carrying its own media fields (e.g. rules inside a singleton).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedMedia {
  pub key: &'static str,
  pub schema: MediaSchema,
}

impl MediaSchema {
  /// Schema for resources without media.
  pub const NONE: MediaSchema = MediaSchema {
    fields: &[],
    nested: &[],
  };

  pub const fn flat(fields: &'static [&'static str]) -> Self {
    Self {
      fields,
      nested: &[],
    }
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty() && self.nested.is_empty()
  }
}

/// Static description of a syncable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
  /// Logical name used by callers (unique)
  pub name: &'static str,
  /// Path on the backend, relative to the base URL
  pub endpoint: &'static str,
  /// Name of the local cache file (without extension)
  pub cache_key: &'static str,
  /// Whether the resource is a list of items with `id` + `date_updated`
  pub is_collection: bool,
  pub media: MediaSchema,
}

/// The field guide's resources, in sync order.
pub const FIELD_GUIDE_RESOURCES: &[ResourceDescriptor] = &[
  ResourceDescriptor {
    name: "home",
    endpoint: "/items/home",
    cache_key: "home",
    is_collection: false,
    media: MediaSchema::flat(&["image", "background"]),
  },
  ResourceDescriptor {
    name: "species",
    endpoint: "/items/species",
    cache_key: "species",
    is_collection: true,
    media: MediaSchema {
      fields: &["image", "icon"],
      nested: &[NestedMedia {
        key: "gallery",
        schema: MediaSchema::flat(&["image"]),
      }],
    },
  },
  ResourceDescriptor {
    name: "trails",
    endpoint: "/items/trails",
    cache_key: "trails",
    is_collection: true,
    media: MediaSchema::flat(&["image", "map_icon"]),
  },
  ResourceDescriptor {
    name: "points_of_interest",
    endpoint: "/items/points_of_interest",
    cache_key: "points_of_interest",
    is_collection: true,
    media: MediaSchema::flat(&["image", "icon", "map_icon"]),
  },
  ResourceDescriptor {
    name: "events",
    endpoint: "/items/events",
    cache_key: "events",
    is_collection: true,
    media: MediaSchema::flat(&["image"]),
  },
  ResourceDescriptor {
    name: "rules",
    endpoint: "/items/rules",
    cache_key: "rules",
    is_collection: false,
    media: MediaSchema {
      fields: &["rules_image", "background"],
      nested: &[NestedMedia {
        key: "rules",
        schema: MediaSchema::flat(&["image", "icon"]),
      }],
    },
  },
  ResourceDescriptor {
    name: "safety",
    endpoint: "/items/safety",
    cache_key: "safety",
    is_collection: false,
    media: MediaSchema {
      fields: &["safety_image", "background"],
      nested: &[NestedMedia {
        key: "tips",
        schema: MediaSchema::flat(&["icon"]),
      }],
    },
  },
  ResourceDescriptor {
    name: "about",
    endpoint: "/items/about",
    cache_key: "about",
    is_collection: false,
    media: MediaSchema::flat(&["image", "background"]),
  },
];

/// Lookup over a fixed set of resource descriptors.
#[derive(Debug, Clone, Copy)]
pub struct Registry {
  descriptors: &'static [ResourceDescriptor],
}

impl Registry {
  pub const fn new(descriptors: &'static [ResourceDescriptor]) -> Self {
    Self { descriptors }
  }

  /// Find a resource by name. Unknown names yield `None`.
  pub fn get(&self, name: &str) -> Option<&'static ResourceDescriptor> {
    self.descriptors.iter().find(|d| d.name == name)
  }

  /// All resources in declaration order.
  pub fn iter(&self) -> impl Iterator<Item = &'static ResourceDescriptor> {
    self.descriptors.iter()
  }

  pub fn len(&self) -> usize {
    self.descriptors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.descriptors.is_empty()
  }
}

impl Default for Registry {
  fn default() -> Self {
    Self::new(FIELD_GUIDE_RESOURCES)
  }
}
