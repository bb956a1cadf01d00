use crate::util::constants::*;
use std::default::Default;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Which barrier set a runtime installs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
pub enum BarrierSelector {
    NoBarrier,
    Generational,
    G1,
}

/// The default upper bound for a single TLAB.
pub const DEFAULT_MAX_TLAB_SIZE: usize = 32 << LOG_BYTES_IN_KBYTE;
/// The default initial TLAB size, before any adaptive sizing happens.
pub const DEFAULT_INITIAL_TLAB_SIZE: usize = 4 << LOG_BYTES_IN_KBYTE;
/// Requests larger than this bypass the TLAB and go to a region directly.
pub const DEFAULT_MAX_TLAB_ALLOC_SIZE: usize = 8 << LOG_BYTES_IN_KBYTE;
/// How many times a G1 post barrier tries the thread-local card queue before
/// falling back to the global overflow queue.
pub const DEFAULT_CARD_ENQUEUE_TRIES: usize = 2;
/// Entries in a thread-local SATB buffer before it is flushed to the shared queue.
pub const DEFAULT_SATB_BUFFER_CAPACITY: usize = 512;

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_fraction(v: &f64) -> bool {
    *v > 0.0 && *v <= 1.0
}

fn is_percentage(v: &usize) -> bool {
    *v <= 100
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// The built-in defaults, ignoring the environment.
            pub fn builtin() -> Self {
                Options {
                    $($name: $default),*
                }
            }

            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => panic!("Invalid Options key: {}", s)
                }
            }

            fn is_known_key(s: &str) -> bool {
                matches!(s, $(stringify!($name))|*)
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options::builtin();

                // If we have env vars that start with RGC_ and match any option (such as RGC_REGION_SIZE),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "RGC_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        if Options::is_known_key(lowercase) {
                            options.set_from_str(lowercase, &val);
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    // Bytes reserved up front for the region block.
    heap_size:                        usize [|v: &usize| *v > 0] = DEFAULT_HEAP_SIZE,
    // Size of a regular region. Must be a power of two and a multiple of the page size.
    region_size:                      usize [|v: &usize| v.is_power_of_two() && *v >= BYTES_IN_PAGE] = DEFAULT_REGION_SIZE,
    // Commit extra regions from the OS once the block is exhausted.
    extend_from_mmap_pool:            bool  [always_valid] = true,
    // Address space reserved after the block for extension regions, in regions.
    max_extension_regions:            usize [always_valid] = 64,
    // log2 of the heap bytes covered by one card.
    card_bits:                        usize [|v: &usize| *v >= LOG_DEFAULT_ALIGNMENT as usize && *v < LOG_DEFAULT_REGION_SIZE] = LOG_BYTES_IN_CARD as usize,
    initial_tlab_size:                usize [|v: &usize| *v > 0] = DEFAULT_INITIAL_TLAB_SIZE,
    max_tlab_size:                    usize [|v: &usize| *v > 0] = DEFAULT_MAX_TLAB_SIZE,
    max_tlab_alloc_size:              usize [always_valid] = DEFAULT_MAX_TLAB_ALLOC_SIZE,
    // Largest factor a TLAB size may grow by in one cycle.
    tlab_max_grow_ratio:              f64   [|v: &f64| *v >= 1.0] = 2.0,
    // Weight of the newest value in the moving averages.
    tlab_weight:                      f64   [is_fraction] = 0.35,
    // Fill fraction the adaptive TLAB sizing aims for.
    tlab_desired_fill_fraction:       f64   [is_fraction] = 0.9,
    tlab_reduction_rate:              f64   [is_fraction] = 0.75,
    g1_card_enqueue_tries:            usize [|v: &usize| *v > 0] = DEFAULT_CARD_ENQUEUE_TRIES,
    // A young region with at least this percentage of live bytes is promoted in place.
    g1_promotion_region_alive_rate:   usize [is_percentage] = 77,
    // Old regions with at least this percentage of garbage are collection candidates.
    g1_region_garbage_rate_threshold: usize [is_percentage] = 65,
    satb_buffer_capacity:             usize [|v: &usize| *v > 0] = DEFAULT_SATB_BUFFER_CAPACITY,
    // Maximum number of eden regions in use. 0 means unbounded.
    desired_eden_length:              usize [always_valid] = 0,
    barrier:                          BarrierSelector [always_valid] = BarrierSelector::G1
}

impl Options {
    /// Set an option by its camel-case name, e.g. `regionSize`.
    pub fn process(&mut self, name: &str, value: &str) -> bool {
        self.set_from_camelcase_str(name, value)
    }

    fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> bool {
        trace!("Trying to process option pair: ({}, {})", s, val);

        let mut sr = String::with_capacity(s.len());
        for c in s.chars() {
            if c.is_uppercase() {
                sr.push('_');
                for c in c.to_lowercase() {
                    sr.push(c);
                }
            } else {
                sr.push(c)
            }
        }

        if !Options::is_known_key(&sr) {
            warn!("unknown option {}", s);
            return false;
        }
        let result = self.set_from_str(sr.as_str(), val);

        if result {
            trace!("Validation passed");
        } else {
            trace!("Validation failed")
        }
        result
    }

    /// Parse a `name=value` list separated by whitespace, e.g. `"regionSize=524288 barrier=G1"`.
    pub fn set_bulk_from_command_line(&mut self, options: &str) -> bool {
        for opt in options.split_ascii_whitespace() {
            let kv: Vec<&str> = opt.split('=').collect();
            if kv.len() != 2 || !self.process(kv[0], kv[1]) {
                return false;
            }
        }
        true
    }

    pub fn max_regions(&self) -> usize {
        self.heap_size / self.region_size
    }
}

impl FromStr for Options {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = Options::builtin();
        if options.set_bulk_from_command_line(s) {
            Ok(options)
        } else {
            Err(format!("invalid options: {}", s))
        }
    }
}
