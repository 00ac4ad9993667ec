pub mod cart;
pub mod cart_item;
pub mod discount;
pub mod order;
pub mod order_address;
pub mod order_item;
pub mod order_shipment;
pub mod order_tax_line;
pub mod payment;
pub mod product;

pub use cart::Entity as Cart;
pub use cart::Model as CartModel;
pub use cart_item::Entity as CartItem;
pub use cart_item::Model as CartItemModel;
pub use discount::Entity as Discount;
pub use discount::Model as DiscountModel;
pub use order::Entity as Order;
pub use order::Model as OrderModel;
pub use order_address::Entity as OrderAddress;
pub use order_item::Entity as OrderItem;
pub use order_shipment::Entity as OrderShipment;
pub use order_shipment::Model as OrderShipmentModel;
pub use order_tax_line::Entity as OrderTaxLine;
pub use payment::Entity as Payment;
pub use payment::Model as PaymentModel;
pub use product::Entity as Product;
pub use product::Model as ProductModel;
