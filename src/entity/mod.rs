pub mod audit_logs;
pub mod cart_items;
pub mod categories;
pub mod coupons;
pub mod favorites;
pub mod order_items;
pub mod order_status_history;
pub mod orders;
pub mod products;
pub mod reviews;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use categories::Entity as Categories;
pub use coupons::Entity as Coupons;
pub use favorites::Entity as Favorites;
pub use order_items::Entity as OrderItems;
pub use order_status_history::Entity as OrderStatusHistory;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use reviews::Entity as Reviews;
pub use users::Entity as Users;
