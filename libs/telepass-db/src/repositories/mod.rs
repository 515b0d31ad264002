pub mod bundle_repo;
pub mod channel_repo;
pub mod subscription_repo;
pub mod user_repo;

pub use bundle_repo::BundleRepository;
pub use channel_repo::ChannelRepository;
pub use subscription_repo::SubscriptionRepository;
pub use user_repo::UserRepository;
