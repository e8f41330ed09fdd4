//! Per-metric backfill strategies.
//!
//! | Metric              | RequestAll                                        |
//! |---------------------|---------------------------------------------------|
//! | Traffic             | day-by-day walk back to the page creation date    |
//! | Wishlists           | day-by-day walk back, stops after empty days      |
//! | Sales               | one history report, table replaced                |
//! | WishlistConversions | one history report, table replaced                |
//! | Reviews             | one export, merged by review id                   |

pub(crate) mod reviews;
pub(crate) mod sales;
pub(crate) mod traffic;
pub(crate) mod wishlist_conversions;
pub(crate) mod wishlists;
