//! Built-in catalog schema
//!
//! Descriptors for the product catalog objects the tool migrates out of the
//! box. A schema file passed with `--schema` replaces this set entirely.

use super::descriptor::{EntityTypeDescriptor, FieldDescriptor};
use super::registry::{SchemaError, SchemaRegistry};

/// Registry holding the built-in catalog descriptors
pub fn builtin_registry() -> Result<SchemaRegistry, SchemaError> {
    SchemaRegistry::from_descriptors(builtin_descriptors())
}

/// Built-in catalog descriptors in registration order
pub fn builtin_descriptors() -> Vec<EntityTypeDescriptor> {
    vec![
        EntityTypeDescriptor::new("ProductCatalog")
            .with_field(FieldDescriptor::new("Name").required())
            .with_field(FieldDescriptor::new("Code").required())
            .with_field(FieldDescriptor::new("Description"))
            .with_field(FieldDescriptor::new("CatalogType"))
            .with_natural_key(["Code"]),
        EntityTypeDescriptor::new("ProductCategory")
            .with_field(FieldDescriptor::new("Name").required())
            .with_field(FieldDescriptor::new("Code").required())
            .with_field(FieldDescriptor::reference("CatalogId", "ProductCatalog").required())
            .with_field(FieldDescriptor::reference("ParentCategoryId", "ProductCategory"))
            .with_field(FieldDescriptor::new("SortOrder").number())
            .with_field(FieldDescriptor::new("Description"))
            .with_natural_key(["Code"]),
        EntityTypeDescriptor::new("Product2")
            .with_field(FieldDescriptor::new("Name").required())
            .with_field(FieldDescriptor::new("StockKeepingUnit").required())
            .with_field(FieldDescriptor::new("ProductCode"))
            .with_field(FieldDescriptor::new("Description"))
            .with_field(FieldDescriptor::new("Type").create_only())
            .with_field(FieldDescriptor::new("IsActive").boolean())
            .with_field(FieldDescriptor::new("ConfigureDuringSale"))
            .with_natural_key(["StockKeepingUnit"]),
        EntityTypeDescriptor::new("ProductCategoryProduct")
            .with_field(FieldDescriptor::reference("ProductCategoryId", "ProductCategory").required())
            .with_field(FieldDescriptor::reference("ProductId", "Product2").required())
            .with_natural_key(["ProductCategoryId", "ProductId"]),
        EntityTypeDescriptor::new("AttributeDefinition")
            .with_field(FieldDescriptor::new("Name").required())
            .with_field(FieldDescriptor::new("Code").required())
            .with_field(FieldDescriptor::new("Label"))
            .with_field(FieldDescriptor::new("DataType").required().create_only())
            .with_field(FieldDescriptor::new("Description"))
            .with_field(FieldDescriptor::new("IsActive").boolean())
            .with_natural_key(["Code"]),
        EntityTypeDescriptor::new("ProductAttributeDefinition")
            .with_field(FieldDescriptor::reference("Product2Id", "Product2").required())
            .with_field(
                FieldDescriptor::reference("AttributeDefinitionId", "AttributeDefinition").required(),
            )
            .with_field(FieldDescriptor::new("Sequence").number())
            .with_field(FieldDescriptor::new("IsRequired").boolean())
            .with_field(FieldDescriptor::new("DefaultValue"))
            .with_natural_key(["Product2Id", "AttributeDefinitionId"]),
        EntityTypeDescriptor::new("ProductSellingModel")
            .with_field(FieldDescriptor::new("Name").required())
            .with_field(FieldDescriptor::new("SellingModelType").required().create_only())
            .with_field(FieldDescriptor::new("PricingTerm").number())
            .with_field(FieldDescriptor::new("PricingTermUnit"))
            .with_field(FieldDescriptor::new("Status"))
            .with_natural_key(["Name"]),
        EntityTypeDescriptor::new("ProductSellingModelOption")
            .with_field(FieldDescriptor::reference("Product2Id", "Product2").required())
            .with_field(
                FieldDescriptor::reference("ProductSellingModelId", "ProductSellingModel").required(),
            )
            .with_field(FieldDescriptor::new("IsDefault").boolean())
            .with_natural_key(["Product2Id", "ProductSellingModelId"]),
        EntityTypeDescriptor::new("Pricebook2")
            .with_field(FieldDescriptor::new("Name").required())
            .with_field(FieldDescriptor::new("Description"))
            .with_field(FieldDescriptor::new("IsActive").boolean())
            .with_natural_key(["Name"]),
        EntityTypeDescriptor::new("PricebookEntry")
            .with_field(FieldDescriptor::reference("Pricebook2Id", "Pricebook2").required())
            .with_field(FieldDescriptor::reference("Product2Id", "Product2").required())
            .with_field(
                FieldDescriptor::reference("ProductSellingModelId", "ProductSellingModel").required(),
            )
            .with_field(FieldDescriptor::new("UnitPrice").number().required())
            .with_field(FieldDescriptor::new("CurrencyIsoCode").create_only())
            .with_field(FieldDescriptor::new("IsActive").boolean())
            .with_natural_key(["Pricebook2Id", "Product2Id", "ProductSellingModelId"]),
        EntityTypeDescriptor::new("ProductComponentGroup")
            .with_field(FieldDescriptor::reference("ParentProductId", "Product2").required())
            .with_field(FieldDescriptor::new("Name").required())
            .with_field(FieldDescriptor::new("Code"))
            .with_field(FieldDescriptor::new("Sequence").number().required())
            .with_field(FieldDescriptor::new("MinBundleComponents").number())
            .with_field(FieldDescriptor::new("MaxBundleComponents").number())
            .with_natural_key(["ParentProductId", "Sequence"])
            .grouped("ParentProductId", "Sequence"),
        EntityTypeDescriptor::new("ProductRelatedComponent")
            .with_field(FieldDescriptor::reference("ParentProductId", "Product2").required())
            .with_field(FieldDescriptor::reference("ChildProductId", "Product2").required())
            .with_field(
                FieldDescriptor::reference("ProductComponentGroupId", "ProductComponentGroup")
                    .scoped_by("ParentProductId")
                    .required(),
            )
            .with_field(FieldDescriptor::new("Sequence").number().required())
            .with_field(FieldDescriptor::new("Quantity").number())
            .with_field(FieldDescriptor::new("IsComponentRequired").boolean())
            .with_field(FieldDescriptor::new("IsDefaultComponent").boolean())
            .with_natural_key(["ParentProductId", "ChildProductId"])
            .grouped("ParentProductId", "Sequence"),
    ]
}
