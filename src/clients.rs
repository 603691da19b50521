pub(crate) mod analytics;
pub(crate) mod cms;
pub(crate) mod google_auth;

pub(crate) use analytics::{AnalyticsClient, AnalyticsConfig};
pub(crate) use cms::{CmsClient, CmsConfig};
